use thiserror::Error;

/// Sensor bridge error types
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload contains forbidden characters")]
    ForbiddenCharacters,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("top-level value is not an object")]
    NotAnObject,

    #[error("log file not found")]
    LogFileNotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
