//! `cadence-events` — the provider-webhook event processor.
//!
//! A worker pool drains the `events` queue. Every event resolves its
//! enrollment, then mutates enrollment state under a per-enrollment keyed
//! lock; interaction writes are append-only and need no lock. Replays are
//! no-ops: interaction rows dedupe on `(provider_id, event_type)` and slot
//! releases dedupe through the execution log's once-markers.

pub mod error;
pub mod processor;

pub use error::{EventError, Result};
pub use processor::EventProcessor;
