//! Shared error types.

/// Why an inbound frame was dropped by the codec.
///
/// A rejected frame never reaches the reducer. Callers log it and move on;
/// it is not an error the UI ever sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    /// The frame is not parseable JSON.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),
    /// The frame is JSON but its type is unknown or its shape is wrong.
    #[error("frame does not match the protocol schema: {0}")]
    Schema(String),
}

impl Rejected {
    pub fn schema(detail: impl Into<String>) -> Self {
        Rejected::Schema(detail.into())
    }
}
