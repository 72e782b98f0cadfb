use store::{StoreError, ValidationError};

/// Errors surfaced by the client side of the CMS.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Raised before anything is sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("rate limit exceeded")]
    RateLimited { attempts: u32 },
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("unreadable response (status {status}): {message}")]
    Parse { status: u16, message: String },
    /// The remote file changed since it was read.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("request queue closed")]
    QueueClosed,
    #[error("queued operation aborted")]
    Aborted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}
