//! Gemini generative-content client
//!
//! Defines the capability contract the rest of the workspace programs
//! against (`GenerativeClient` / `ChatSession`) and a reqwest-based
//! implementation speaking the Generative Language REST API: JSON
//! `generateContent` for single-shot calls and `streamGenerateContent`
//! (SSE) for incremental output.
//!
//! Error classification happens here and nowhere else: every non-success
//! HTTP response is converted into a typed [`ApiError`] so that callers
//! (the pool prober, the dispatcher) branch on `is_rate_limited()` and
//! `retry_after()` instead of matching on error text.

pub mod client;
pub mod error;
pub mod http;
pub mod sse;
pub mod types;

pub use client::{ChatSession, GenerativeClient, Result, TokenStream};
pub use error::{ApiError, classify_response};
pub use http::{DEFAULT_BASE_URL, GeminiHttpClient};
pub use types::{Content, GenerateConfig, GenerateOutput, InlineData, Part, StreamChunk};
