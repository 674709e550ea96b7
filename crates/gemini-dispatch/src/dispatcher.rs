//! Retry loop, per-caller sessions, and output surfacing
//!
//! The dispatcher never sees raw HTTP: it works against the pool's
//! `Arc<dyn GenerativeClient>` and reacts to `ApiError` classification.
//! Retry budget is the pool size snapshotted at the start of the turn, so
//! a turn touches each key at most once even while keys are added
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use gemini_client::{
    ApiError, ChatSession, Content, GenerateConfig, GenerateOutput, Part, TokenStream,
};
use gemini_pool::{KeyPool, RotateOutcome};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};
use crate::throttle::StreamThrottler;
use crate::transport::{Markup, MessageHandle, Renderer, Transport, TransportError};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Operator-visible status texts. Localization belongs to the transport
/// layer; these are plain English defaults.
#[derive(Debug, Clone)]
pub struct Notices {
    /// Placeholder posted before any tokens arrive.
    pub generating: String,
    /// Shown when the stream finished without visible text.
    pub empty_reply: String,
    /// Shown while rotating to another key.
    pub switching: String,
    /// Shown when every key has been tried.
    pub exhausted: String,
    /// Prepended to the upstream error in diagnostic edits.
    pub error_prefix: String,
}

impl Default for Notices {
    fn default() -> Self {
        Self {
            generating: "Generating…".into(),
            empty_reply: "The model returned an empty reply. Please try again.".into(),
            switching: "Switching to the next API key…".into(),
            exhausted: "All API keys are rate limited or unavailable. Please try again later."
                .into(),
            error_prefix: "Request failed: ".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    caller: u64,
    model: String,
}

struct SessionEntry {
    /// Secret the session was created against; a mismatch with the pool's
    /// active secret means the conversation must restart on the new key.
    secret: String,
    session: Box<dyn ChatSession>,
}

/// Mediates generation requests between a chat front end and the pool.
pub struct Dispatcher {
    pool: Arc<KeyPool>,
    transport: Arc<dyn Transport>,
    renderer: Arc<dyn Renderer>,
    sessions: Mutex<HashMap<SessionKey, SessionEntry>>,
    flush_interval: Duration,
    notices: Notices,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<KeyPool>,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn Renderer>,
        flush_interval: Duration,
        notices: Notices,
    ) -> Self {
        Self {
            pool,
            transport,
            renderer,
            sessions: Mutex::new(HashMap::new()),
            flush_interval,
            notices,
        }
    }

    /// One streamed text turn in the caller's conversation.
    pub async fn chat(
        &self,
        origin: MessageHandle,
        caller: u64,
        model: &str,
        text: &str,
    ) -> Result<()> {
        self.streamed_turn(origin, caller, model, Content::user_text(text))
            .await
    }

    /// One streamed multi-modal turn (e.g. image plus caption) in the same
    /// conversation.
    pub async fn understand(
        &self,
        origin: MessageHandle,
        caller: u64,
        model: &str,
        parts: Vec<Part>,
    ) -> Result<()> {
        self.streamed_turn(origin, caller, model, Content::user(parts))
            .await
    }

    /// Single-shot generation outside any conversation; the caller decides
    /// how to deliver the text and optional image bytes.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        config: &GenerateConfig,
    ) -> Result<GenerateOutput> {
        let budget = self.pool.len().await;
        if budget == 0 {
            return Err(DispatchError::NoCredentials);
        }

        let mut attempts = 0;
        loop {
            let Some((secret, client)) = self.pool.active_binding().await else {
                return Err(DispatchError::NoCredentials);
            };

            match client
                .generate(model, vec![Content::user_text(prompt)], config)
                .await
            {
                Ok(output) => return Ok(output),
                Err(err) => {
                    attempts += 1;
                    warn!(attempts, error = %err, "single-shot attempt failed");
                    self.park_if_rate_limited(&secret, &err).await;
                    if attempts >= budget {
                        return Err(DispatchError::Exhausted { attempts });
                    }
                    match self.pool.rotate_next().await {
                        RotateOutcome::Switched { .. } => continue,
                        RotateOutcome::Exhausted => {
                            return Err(DispatchError::Exhausted { attempts });
                        }
                    }
                }
            }
        }
    }

    /// Drop the caller's stored session so the next turn starts fresh.
    pub async fn reset_session(&self, caller: u64, model: &str) -> bool {
        self.sessions
            .lock()
            .await
            .remove(&SessionKey {
                caller,
                model: model.to_owned(),
            })
            .is_some()
    }

    async fn streamed_turn(
        &self,
        origin: MessageHandle,
        caller: u64,
        model: &str,
        content: Content,
    ) -> Result<()> {
        let placeholder = self
            .transport
            .reply(&origin, &self.notices.generating, Markup::Plain)
            .await?;

        let budget = self.pool.len().await;
        if budget == 0 {
            self.plain_edit(&placeholder, &self.notices.exhausted).await;
            return Err(DispatchError::NoCredentials);
        }

        let key = SessionKey {
            caller,
            model: model.to_owned(),
        };
        let mut attempts = 0;

        loop {
            // Secret and client are captured as one pair; the attempt is
            // attributed to this credential even if the pool rotates
            // underneath it.
            let Some((active, client)) = self.pool.active_binding().await else {
                self.plain_edit(&placeholder, &self.notices.exhausted).await;
                return Err(DispatchError::NoCredentials);
            };

            // Sessions are single-key: reuse only when still bound to the
            // active secret, otherwise the conversation restarts.
            let mut entry = match self.sessions.lock().await.remove(&key) {
                Some(entry) if entry.secret == active => entry,
                _ => SessionEntry {
                    secret: active.clone(),
                    session: client.start_chat(model, GenerateConfig::default()),
                },
            };

            let outcome = match entry.session.send(content.clone()).await {
                Ok(stream) => self.drain(stream, &placeholder).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(throttler) => {
                    let had_text = !throttler.is_empty();
                    let final_text = throttler.finalize(&self.notices.empty_reply);
                    self.emit(&placeholder, &final_text).await?;
                    if had_text {
                        entry.session.commit_reply(&final_text);
                    }
                    self.sessions.lock().await.insert(key, entry);
                    info!(caller, model, "turn complete");
                    return Ok(());
                }
                Err(err) => {
                    attempts += 1;
                    warn!(caller, model, attempts, error = %err, "turn attempt failed");
                    self.park_if_rate_limited(&active, &err).await;
                    if attempts >= budget {
                        self.plain_edit(&placeholder, &self.notices.exhausted).await;
                        return Err(DispatchError::Exhausted { attempts });
                    }

                    let diagnostic = format!(
                        "{}{}\n{}",
                        self.notices.error_prefix, err, self.notices.switching
                    );
                    self.plain_edit(&placeholder, &diagnostic).await;

                    match self.pool.rotate_next().await {
                        RotateOutcome::Switched { .. } => continue,
                        RotateOutcome::Exhausted => {
                            self.plain_edit(&placeholder, &self.notices.exhausted).await;
                            return Err(DispatchError::Exhausted { attempts });
                        }
                    }
                }
            }
        }
    }

    /// Consume the stream, editing the placeholder at most once per flush
    /// interval.
    async fn drain(
        &self,
        mut stream: TokenStream,
        placeholder: &MessageHandle,
    ) -> std::result::Result<StreamThrottler, ApiError> {
        let mut throttler = StreamThrottler::new(self.flush_interval);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            throttler.feed(&chunk.text);
            if throttler.should_flush() {
                let snapshot = throttler.flush();
                self.plain_edit(placeholder, &snapshot).await;
            }
        }
        Ok(throttler)
    }

    /// Final edit: rich markup first, plain on render failure or markup
    /// rejection, NotModified swallowed.
    async fn emit(&self, handle: &MessageHandle, text: &str) -> Result<()> {
        let attempt = match self.renderer.render(text) {
            Ok(rich) => self.transport.edit(handle, &rich, Markup::Rich).await,
            Err(err) => {
                debug!(error = %err, "render failed, sending plain");
                self.transport.edit(handle, text, Markup::Plain).await
            }
        };

        match attempt {
            Ok(()) | Err(TransportError::NotModified) => Ok(()),
            Err(TransportError::MarkupRejected(reason)) => {
                debug!(reason, "markup rejected, resending plain");
                match self.transport.edit(handle, text, Markup::Plain).await {
                    Ok(()) | Err(TransportError::NotModified) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort intermediate edit; only NotModified is expected.
    async fn plain_edit(&self, handle: &MessageHandle, text: &str) {
        match self.transport.edit(handle, text, Markup::Plain).await {
            Ok(()) | Err(TransportError::NotModified) => {}
            Err(err) => warn!(error = %err, "intermediate edit failed"),
        }
    }

    async fn park_if_rate_limited(&self, secret: &str, err: &ApiError) {
        if !err.is_rate_limited() {
            return;
        }
        self.pool.report_rate_limited(secret, err.retry_after()).await;
    }
}
