//! `cadence-scheduler` — the per-tick enrollment pipeline.
//!
//! Every poll interval the engine fetches the due batch and walks each
//! enrollment through the full pipeline: exhaustion and timeout checks,
//! human-intervention hold, skip conditions, the business-hours and
//! regulatory gates, context assembly, variable binding, A/B selection,
//! rendering, adaptive mutation, healing pre-checks, dispatch, and
//! advancement with the emotion-based delay multiplier. One enrollment's
//! failure never touches the rest of the batch.

pub mod delay;
pub mod engine;
pub mod error;
pub mod pipeline;

pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
