//! `cadence-memory` — conversation memory and the emotional analyzer (CMEA).
//!
//! Given (contact, enrollment), [`context::ConversationMemory`] assembles a
//! context object from the interaction log: per-channel summaries, counters,
//! objection/topic history, overall sentiment, and a plain-text timeline fit
//! for injection into voice system prompts. Assembly is best-effort — store
//! failures degrade to an empty context rather than blocking a dispatch.
//!
//! The analyzer wraps the language-model interface and returns an explicit
//! [`cadence_core::analysis::AnalysisOutcome`]; engagement and trend are
//! closed-form functions over recent interactions.

pub mod analyzer;
pub mod context;
pub mod engagement;
pub mod error;
pub mod trend;
pub mod types;

pub use analyzer::EmotionalAnalyzer;
pub use context::ConversationMemory;
pub use error::{MemoryError, Result};
pub use types::ConversationContext;
