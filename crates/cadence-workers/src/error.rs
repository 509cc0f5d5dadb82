use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] cadence_store::StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] cadence_bus::BusError),

    #[error("Umbrella error: {0}")]
    Umbrella(#[from] cadence_umbrella::UmbrellaError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::providers::ProviderError),

    #[error("Healing error: {0}")]
    Healing(#[from] cadence_adapt::AdaptError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
