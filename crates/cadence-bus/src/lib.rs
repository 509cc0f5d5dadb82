//! `cadence-bus` — typed priority job queues on the coordination store.
//!
//! Five queues (`sms`, `email`, `voice`, `events`, `healing`), each with
//! delayed delivery and priority ordering. A job is a JSON envelope in a
//! redis sorted set: enqueue lands it in the `delayed` zset scored by its
//! ready-at time; an atomic Lua script promotes due members into the
//! `ready` zset (scored by priority, FIFO within a priority) and pops the
//! head. Lower priority integers pop sooner.

pub mod error;
pub mod queue;
pub mod types;

pub use error::{BusError, Result};
pub use queue::{Delivery, JobBus, QueueName};
pub use types::{EmailJob, EventJob, HealingJob, JobEnvelope, ProviderEvent, SmsJob, VoiceJob};
