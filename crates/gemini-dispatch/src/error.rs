//! Error types for dispatch operations

use crate::transport::TransportError;

/// Errors from dispatch operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no credentials configured")]
    NoCredentials,

    #[error("all credentials exhausted after {attempts} attempts")]
    Exhausted { attempts: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
