use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Store error: {0}")]
    Store(#[from] cadence_store::StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] cadence_bus::BusError),

    #[error("Umbrella error: {0}")]
    Umbrella(#[from] cadence_umbrella::UmbrellaError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventError>;
