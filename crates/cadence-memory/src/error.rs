use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Store error: {0}")]
    Store(#[from] cadence_store::StoreError),

    #[error("Analyzer error: {0}")]
    Analyzer(#[from] cadence_llm::LlmError),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
