//! Transport and renderer capability contracts
//!
//! The chat transport itself lives outside this workspace; the dispatcher
//! only needs to post a message, edit it in place, and know the three
//! outcomes it must react to. Dyn-compatible for the same reason as the
//! client traits: the dispatcher holds `Arc<dyn Transport>`.

use std::future::Future;
use std::pin::Pin;

/// Address of one message on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

/// How the text should be interpreted by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    Rich,
    Plain,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Edit carried identical content; not a failure.
    #[error("message not modified")]
    NotModified,

    /// The transport refused the rich markup; the text should be re-sent
    /// plain.
    #[error("markup rejected: {0}")]
    MarkupRejected(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Minimal messaging surface the dispatcher edits through.
pub trait Transport: Send + Sync {
    /// Post a new message in reply to `to`, returning its handle.
    fn reply<'a>(
        &'a self,
        to: &'a MessageHandle,
        text: &'a str,
        markup: Markup,
    ) -> Pin<Box<dyn Future<Output = Result<MessageHandle, TransportError>> + Send + 'a>>;

    /// Replace the content of an existing message.
    fn edit<'a>(
        &'a self,
        target: &'a MessageHandle,
        text: &'a str,
        markup: Markup,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;
}

/// Converts raw model text into the transport's rich markup.
pub trait Renderer: Send + Sync {
    fn render(&self, text: &str) -> Result<String, RenderError>;
}

#[derive(Debug, thiserror::Error)]
#[error("render failed: {0}")]
pub struct RenderError(pub String);
