use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] cadence_store::StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] cadence_bus::BusError),

    #[error("Adaptation error: {0}")]
    Adapt(#[from] cadence_adapt::AdaptError),

    #[error("{entity} missing for enrollment {enrollment_id}: {id}")]
    MissingRow {
        entity: &'static str,
        enrollment_id: String,
        id: String,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
