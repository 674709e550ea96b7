//! Typed API error classification
//!
//! Quota/rate failures carry an optional retry-after hint so the pool can
//! set a cooldown deadline without inspecting response text. Hint sources,
//! in order: the `Retry-After` header, a `retryDelay` entry in the error
//! payload's details, none.

use std::time::Duration;

use thiserror::Error;

/// Errors from generative-content API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Quota or rate limit exhausted on this credential.
    #[error("rate limited ({status}): {message}")]
    RateLimited {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other non-success response (invalid key, bad request, 5xx).
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Connection-level failure before a status was received.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 2xx response whose body did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether this failure should put the credential into cooldown.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Retry-after hint extracted from the failure, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Classify a non-success HTTP response into a typed error.
///
/// 429 becomes `RateLimited` (with whatever retry hint the response
/// carried); every other status becomes `Api`. Callers decide what
/// "invalid credential" means for their operation — a failed premium
/// probe, for example, is expected for standard-tier keys.
pub fn classify_response(status: u16, retry_after_header: Option<&str>, body: &str) -> ApiError {
    let message = extract_message(body).unwrap_or_else(|| truncate(body, 200));
    if status == 429 {
        let retry_after = retry_after_header
            .and_then(parse_retry_after)
            .or_else(|| extract_retry_delay(body));
        return ApiError::RateLimited {
            status,
            message,
            retry_after,
        };
    }
    ApiError::Api { status, message }
}

/// Pull `error.message` out of a Google-style error payload.
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_owned)
}

/// Parse a `Retry-After` header value (whole seconds only; HTTP-date
/// forms are ignored since the API does not emit them).
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Find a `retryDelay` hint (e.g. `"13s"`) in the error payload details.
fn extract_retry_delay(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let details = value.get("error")?.get("details")?.as_array()?;
    for detail in details {
        if let Some(delay) = detail.get("retryDelay").and_then(|v| v.as_str()) {
            let secs: f64 = delay.trim_end_matches('s').parse().ok()?;
            if secs.is_finite() && secs >= 0.0 {
                return Some(Duration::from_secs_f64(secs));
            }
        }
    }
    None
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_429_with_header_hint() {
        let err = classify_response(429, Some("30"), r#"{"error":{"message":"quota"}}"#);
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn classify_429_with_retry_delay_detail() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted",
            "status":"RESOURCE_EXHAUSTED",
            "details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"13s"}]}}"#;
        let err = classify_response(429, None, body);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(13)));
    }

    #[test]
    fn classify_429_header_wins_over_body() {
        let body = r#"{"error":{"message":"q","details":[{"retryDelay":"99s"}]}}"#;
        let err = classify_response(429, Some("5"), body);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn classify_429_without_hint_has_no_retry_after() {
        let err = classify_response(429, None, r#"{"error":{"message":"quota exceeded"}}"#);
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn classify_400_is_api_error() {
        let err = classify_response(400, None, r#"{"error":{"message":"API key not valid"}}"#);
        assert!(!err.is_rate_limited());
        match err {
            ApiError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn classify_unparseable_body_falls_back_to_raw_text() {
        let err = classify_response(503, None, "upstream overloaded");
        assert_eq!(err.to_string(), "API error 503: upstream overloaded");
    }

    #[test]
    fn retry_after_ignores_http_date_values() {
        let err = classify_response(429, Some("Wed, 21 Oct 2026 07:28:00 GMT"), "{}");
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(500);
        let err = classify_response(500, None, &body);
        assert!(err.to_string().len() < 250, "got: {err}");
    }
}
