use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors from issuing or reading a generation stream.
///
/// `Cancelled` is deliberately its own variant: callers translate it
/// into a "stopped" notification while everything else surfaces as a
/// generic upstream failure.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(StatusCode),

    #[error("generation cancelled")]
    Cancelled,
}

impl StreamError {
    /// Whether this error was caused by cancellation rather than a
    /// genuine upstream failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}
