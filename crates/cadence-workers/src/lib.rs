//! `cadence-workers` — channel queue consumers.
//!
//! The voice worker is the slot-gated one: it acquires an umbrella slot
//! before placing a call and deliberately does NOT release it — the
//! provider's end-of-call webhook does, with the concurrency sync as the
//! backstop for lost webhooks. SMS and email workers are plain send-and-
//! retry consumers. The healing worker drains dispatch failures into the
//! self-healer, one decision per failure.

pub mod email;
pub mod error;
pub mod healing;
pub mod providers;
pub mod sms;
pub mod voice;

pub use email::EmailWorker;
pub use error::{Result, WorkerError};
pub use healing::HealingWorker;
pub use sms::SmsWorker;
pub use voice::VoiceWorker;
