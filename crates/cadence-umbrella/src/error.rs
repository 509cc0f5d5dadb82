use thiserror::Error;

#[derive(Debug, Error)]
pub enum UmbrellaError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store error: {0}")]
    Store(#[from] cadence_store::StoreError),

    #[error("No umbrella assignment for tenant {tenant_id}")]
    Unassigned { tenant_id: String },

    #[error("Unexpected script reply: {0}")]
    BadScriptReply(String),
}

pub type Result<T> = std::result::Result<T, UmbrellaError>;
