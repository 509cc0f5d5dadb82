use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Coordination store error: {0}")]
    Coordination(String),

    #[error("LLM provider error: {0}")]
    Llm(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Invalid content payload: {0}")]
    InvalidContent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CadenceError {
    /// Short stable error code for logs and webhook error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CadenceError::Config(_) => "CONFIG_ERROR",
            CadenceError::Database(_) => "DATABASE_ERROR",
            CadenceError::Coordination(_) => "COORDINATION_ERROR",
            CadenceError::Llm(_) => "LLM_ERROR",
            CadenceError::Channel { .. } => "CHANNEL_ERROR",
            CadenceError::UnknownTimezone(_) => "UNKNOWN_TIMEZONE",
            CadenceError::InvalidContent(_) => "INVALID_CONTENT",
            CadenceError::Serialization(_) => "SERIALIZATION_ERROR",
            CadenceError::Io(_) => "IO_ERROR",
            CadenceError::Timeout { .. } => "TIMEOUT",
            CadenceError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
