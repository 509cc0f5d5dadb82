use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("Store error: {0}")]
    Store(#[from] cadence_store::StoreError),

    #[error("Model error: {0}")]
    Model(#[from] cadence_llm::LlmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AdaptError>;
