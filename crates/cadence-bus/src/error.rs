use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed job envelope on queue {queue}: {reason}")]
    MalformedJob { queue: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BusError>;
