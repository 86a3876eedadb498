use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("cannot encode name '{name}': {reason}")]
    Encoding { name: String, reason: String },

    #[error("malformed name at offset {offset}: {reason}")]
    MalformedName { offset: usize, reason: String },

    #[error("truncated message: need {needed} bytes at offset {offset}, have {len}")]
    Truncated { offset: usize, needed: usize, len: usize },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("cache store error: {0}")]
    CacheIo(String),

    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),
}

impl GatewayError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        GatewayError::MalformedName { offset, reason: reason.into() }
    }
}

impl From<csv::Error> for GatewayError {
    fn from(e: csv::Error) -> Self {
        GatewayError::CacheIo(e.to_string())
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
