//! reqwest-backed client for the Generative Language REST API
//!
//! Authentication is the `x-goog-api-key` header. Single-shot calls hit
//! `models/{model}:generateContent`; streaming calls hit
//! `models/{model}:streamGenerateContent?alt=sse` and decode `data:`
//! frames incrementally.

use async_stream::try_stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

use crate::client::{ChatSession, GenerativeClient, Result, TokenStream};
use crate::error::{ApiError, classify_response};
use crate::sse::SseBuffer;
use crate::types::{Content, GenerateConfig, GenerateOutput, StreamChunk};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client bound to a single API key.
#[derive(Clone)]
pub struct GeminiHttpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiHttpClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self::with_base_url(http, api_key, DEFAULT_BASE_URL)
    }

    /// Point the client at an alternate endpoint (tests, proxies).
    pub fn with_base_url(
        http: reqwest::Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    /// POST a request body and classify any non-success status.
    async fn post(&self, url: &str, body: &GenerateRequest) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "upstream response");
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let text = response.text().await.unwrap_or_default();
        Err(classify_response(
            status.as_u16(),
            retry_after.as_deref(),
            &text,
        ))
    }

    async fn generate_call(
        &self,
        model: &str,
        contents: Vec<Content>,
        config: &GenerateConfig,
    ) -> Result<GenerateOutput> {
        let request = GenerateRequest::build(contents, config);
        let response = self
            .post(&self.endpoint(model, "generateContent"), &request)
            .await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        parsed.into_output()
    }

    async fn stream_call(
        &self,
        model: &str,
        contents: Vec<Content>,
        config: &GenerateConfig,
    ) -> Result<TokenStream> {
        let request = GenerateRequest::build(contents, config);
        let url = format!("{}?alt=sse", self.endpoint(model, "streamGenerateContent"));
        let response = self.post(&url, &request).await?;

        let stream = try_stream! {
            let mut body = response.bytes_stream();
            let mut decoder = SseBuffer::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                for payload in decoder.push(&chunk) {
                    if let Some(text) = frame_text(&payload) {
                        if !text.is_empty() {
                            yield StreamChunk { text };
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

impl GenerativeClient for GeminiHttpClient {
    fn generate<'a>(
        &'a self,
        model: &'a str,
        contents: Vec<Content>,
        config: &'a GenerateConfig,
    ) -> Pin<Box<dyn Future<Output = Result<GenerateOutput>> + Send + 'a>> {
        Box::pin(self.generate_call(model, contents, config))
    }

    fn generate_stream<'a>(
        &'a self,
        model: &'a str,
        contents: Vec<Content>,
        config: &'a GenerateConfig,
    ) -> Pin<Box<dyn Future<Output = Result<TokenStream>> + Send + 'a>> {
        Box::pin(self.stream_call(model, contents, config))
    }

    fn start_chat(&self, model: &str, config: GenerateConfig) -> Box<dyn ChatSession> {
        Box::new(HttpChatSession {
            client: self.clone(),
            model: model.to_owned(),
            config,
            history: Vec::new(),
        })
    }
}

/// Chat session that replays its full history on every send.
///
/// The API is stateless, so "session" here is client-held history. The
/// user turn is appended eagerly; the model turn only lands when the
/// caller commits it after draining the stream.
struct HttpChatSession {
    client: GeminiHttpClient,
    model: String,
    config: GenerateConfig,
    history: Vec<Content>,
}

impl ChatSession for HttpChatSession {
    fn send(
        &mut self,
        content: Content,
    ) -> Pin<Box<dyn Future<Output = Result<TokenStream>> + Send + '_>> {
        self.history.push(content);
        let client = self.client.clone();
        let model = self.model.clone();
        let config = self.config.clone();
        let history = self.history.clone();
        Box::pin(async move { client.stream_call(&model, history, &config).await })
    }

    fn commit_reply(&mut self, text: &str) {
        self.history.push(Content::model_text(text));
    }
}

/// Extract candidate text from one streamed frame; frames without text
/// (usage metadata, safety blocks) yield nothing.
fn frame_text(payload: &str) -> Option<String> {
    let frame: GenerateResponse = serde_json::from_str(payload).ok()?;
    let candidate = frame.candidates.into_iter().next()?;
    let content = candidate.content?;
    let text: String = content.parts.iter().filter_map(|p| p.text.clone()).collect();
    Some(text)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    response_modalities: Vec<&'static str>,
}

impl GenerateRequest {
    fn build(contents: Vec<Content>, config: &GenerateConfig) -> Self {
        Self {
            contents,
            system_instruction: config
                .system_instruction
                .as_ref()
                .map(|text| Content::user_text(text.clone())),
            generation_config: config.image_output.then(|| WireGenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            }),
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    fn into_output(self) -> Result<GenerateOutput> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::InvalidResponse("no candidates in response".into()))?;
        let content = candidate
            .content
            .ok_or_else(|| ApiError::InvalidResponse("candidate has no content".into()))?;

        let mut output = GenerateOutput::default();
        for part in content.parts {
            if let Some(text) = part.text {
                output.text.push_str(&text);
            }
            if output.image.is_none() {
                if let Some(inline) = part.inline_data {
                    use base64::Engine;
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(inline.data.as_bytes())
                        .map_err(|e| {
                            ApiError::InvalidResponse(format!("bad inline data: {e}"))
                        })?;
                    output.image = Some(bytes);
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use futures::TryStreamExt;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: &str) -> GeminiHttpClient {
        GeminiHttpClient::with_base_url(reqwest::Client::new(), "test-key-0001", base_url)
    }

    #[tokio::test]
    async fn generate_returns_concatenated_text() {
        let app = Router::new().fallback(|| async {
            axum::Json(serde_json::json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{"text": "Hello"}, {"text": ", world"}]
                    }
                }]
            }))
        });
        let base = serve(app).await;

        let out = client(&base)
            .generate_call("gemini-2.5-flash", vec![Content::user_text("hi")], &GenerateConfig::default())
            .await
            .unwrap();
        assert_eq!(out.text, "Hello, world");
        assert!(out.image.is_none());
    }

    #[tokio::test]
    async fn generate_decodes_inline_image_bytes() {
        let app = Router::new().fallback(|| async {
            axum::Json(serde_json::json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "a cat"},
                            {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                        ]
                    }
                }]
            }))
        });
        let base = serve(app).await;

        let out = client(&base)
            .generate_call("gemini-2.5-flash-image", vec![Content::user_text("draw")], &GenerateConfig {
                image_output: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(out.text, "a cat");
        assert_eq!(out.image, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn api_key_header_is_sent() {
        let app = Router::new().fallback(|headers: HeaderMap| async move {
            if headers.get("x-goog-api-key").map(|v| v.as_bytes()) == Some(b"test-key-0001") {
                axum::Json(serde_json::json!({
                    "candidates": [{"content": {"role": "model", "parts": [{"text": "ok"}]}}]
                }))
                .into_response()
            } else {
                StatusCode::UNAUTHORIZED.into_response()
            }
        });
        let base = serve(app).await;

        let out = client(&base)
            .generate_call("m", vec![Content::user_text("hi")], &GenerateConfig::default())
            .await
            .unwrap();
        assert_eq!(out.text, "ok");
    }

    #[tokio::test]
    async fn rate_limit_response_maps_to_typed_error() {
        let app = Router::new().fallback(|| async {
            Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .header(header::RETRY_AFTER, "42")
                .body(Body::from(r#"{"error":{"message":"quota exceeded"}}"#))
                .unwrap()
        });
        let base = serve(app).await;

        let err = client(&base)
            .generate_call("m", vec![Content::user_text("hi")], &GenerateConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(42)));
    }

    #[tokio::test]
    async fn empty_candidates_is_invalid_response() {
        let app = Router::new()
            .fallback(|| async { axum::Json(serde_json::json!({"candidates": []})) });
        let base = serve(app).await;

        let err = client(&base)
            .generate_call("m", vec![Content::user_text("hi")], &GenerateConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn stream_yields_text_chunks_in_order() {
        let frame1 = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}"#;
        let frame2 = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"lo"}]}}]}"#;
        let body = format!("data: {frame1}\r\n\r\ndata: {frame2}\r\n\r\n");
        let app = Router::new().fallback(move || {
            let body = body.clone();
            async move {
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(Body::from(body))
                    .unwrap()
            }
        });
        let base = serve(app).await;

        let stream = client(&base)
            .stream_call("m", vec![Content::user_text("hi")], &GenerateConfig::default())
            .await
            .unwrap();
        let chunks: Vec<StreamChunk> = stream.try_collect().await.unwrap();
        let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn stream_rate_limit_fails_before_any_chunk() {
        let app = Router::new().fallback(|| async {
            Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .body(Body::from(r#"{"error":{"message":"quota"}}"#))
                .unwrap()
        });
        let base = serve(app).await;

        let result = client(&base)
            .stream_call("m", vec![Content::user_text("hi")], &GenerateConfig::default())
            .await;
        match result {
            Ok(_) => panic!("expected a rate-limit error before any chunk"),
            Err(err) => assert!(err.is_rate_limited()),
        }
    }

    #[tokio::test]
    async fn chat_session_replays_history() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let turns_seen = Arc::new(AtomicUsize::new(0));
        let counter = turns_seen.clone();
        let app = Router::new().fallback(move |body: String| {
            let counter = counter.clone();
            async move {
                let request: serde_json::Value = serde_json::from_str(&body).unwrap();
                let turns = request["contents"].as_array().unwrap().len();
                counter.store(turns, Ordering::SeqCst);
                let frame =
                    r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"reply"}]}}]}"#;
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(Body::from(format!("data: {frame}\n\n")))
                    .unwrap()
            }
        });
        let base = serve(app).await;

        let mut session = client(&base).start_chat("m", GenerateConfig::default());

        let stream = session.send(Content::user_text("first")).await.unwrap();
        let _: Vec<StreamChunk> = stream.try_collect().await.unwrap();
        assert_eq!(turns_seen.load(Ordering::SeqCst), 1);
        session.commit_reply("reply");

        let stream = session.send(Content::user_text("second")).await.unwrap();
        let _: Vec<StreamChunk> = stream.try_collect().await.unwrap();
        // user + model + user
        assert_eq!(turns_seen.load(Ordering::SeqCst), 3);
    }
}
