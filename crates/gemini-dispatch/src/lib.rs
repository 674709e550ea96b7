//! Generation dispatcher
//!
//! Sits between a chat front end and the credential pool: runs streamed
//! and single-shot generations against the pool's active client, retries
//! across keys when a credential hits its quota, and throttles the edits
//! that surface incremental output to the transport.
//!
//! Request lifecycle for a streamed turn:
//! 1. Post a "generating" placeholder via the transport
//! 2. Take (or create) the caller's session bound to the active key
//! 3. Drain the token stream, editing the placeholder at most once per
//!    flush interval
//! 4. On a quota error: cooldown the key, surface a diagnostic edit,
//!    rotate, retry with a fresh session — bounded by the pool size
//! 5. Render the final text rich, falling back to plain when the markup
//!    is rejected

pub mod dispatcher;
pub mod error;
pub mod throttle;
pub mod transport;

pub use dispatcher::{DEFAULT_FLUSH_INTERVAL, Dispatcher, Notices};
pub use error::DispatchError;
pub use throttle::StreamThrottler;
pub use transport::{Markup, MessageHandle, RenderError, Renderer, Transport, TransportError};
