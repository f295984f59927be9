//! Client error type.

use thiserror::Error;

/// Errors returned by the imperative client calls.
///
/// Nothing inside the sync loop is propagated to consumers; these only come
/// back from calls such as `send_command` or configuration loading.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
}
