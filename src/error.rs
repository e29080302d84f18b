use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid engine configuration (window, MA type, alpha, thresholds).
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid tick: {0}")]
    InvalidTick(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Whether this error should stop the process rather than a single tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
