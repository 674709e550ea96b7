//! Capability contracts for generative-content providers
//!
//! Dyn-compatible traits so the pool can hold `Arc<dyn GenerativeClient>`
//! built from whichever credential is active, and tests can substitute
//! scripted fakes. Async methods return boxed futures by hand for dyn
//! compatibility.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;

use crate::error::ApiError;
use crate::types::{Content, GenerateConfig, GenerateOutput, StreamChunk};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Incremental reply pieces from a streaming call.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A client bound to one credential.
pub trait GenerativeClient: Send + Sync {
    /// Single-shot generation; resolves once the full reply is available.
    fn generate<'a>(
        &'a self,
        model: &'a str,
        contents: Vec<Content>,
        config: &'a GenerateConfig,
    ) -> Pin<Box<dyn Future<Output = Result<GenerateOutput>> + Send + 'a>>;

    /// Streaming generation; resolves to a stream once headers arrive,
    /// so rate-limit classification happens before any tokens flow.
    fn generate_stream<'a>(
        &'a self,
        model: &'a str,
        contents: Vec<Content>,
        config: &'a GenerateConfig,
    ) -> Pin<Box<dyn Future<Output = Result<TokenStream>> + Send + 'a>>;

    /// Open a multi-turn session against this credential.
    fn start_chat(&self, model: &str, config: GenerateConfig) -> Box<dyn ChatSession>;
}

/// Conversational state bound to the credential that created it.
///
/// History only advances when the caller commits the drained reply, so a
/// stream that dies mid-flight leaves the session at its pre-send state
/// minus the user turn (matching a retry that resends the same prompt).
pub trait ChatSession: Send {
    /// Append a user turn and stream the model's reply.
    fn send(
        &mut self,
        content: Content,
    ) -> Pin<Box<dyn Future<Output = Result<TokenStream>> + Send + '_>>;

    /// Record the model's reply after the caller has drained the stream.
    fn commit_reply(&mut self, text: &str);
}
