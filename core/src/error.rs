/// Error types for the sharing pipeline
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("count unavailable: no content-range header in response")]
    CountUnavailable,

    #[error("invalid count header: {0}")]
    InvalidCount(String),

    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("initialization timed out")]
    InitTimeout,

    #[error("initialization failed after {attempts} attempts")]
    InitFailed { attempts: u32 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShareError>;
