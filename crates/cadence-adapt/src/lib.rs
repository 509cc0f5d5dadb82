//! `cadence-adapt` — the content adaptation pipeline.
//!
//! Four cooperating pieces, all invoked from the scheduler's per-enrollment
//! pipeline (and the healing worker):
//!
//! * [`render`] — deterministic, idempotent `{{key}}` substitution plus the
//!   variable-binding precedence chain.
//! * [`variants`] — weighted A/B draw over a step's active variants.
//! * [`mutate`] — LLM rewrite of upcoming content, guarded by preconditions,
//!   invariant checks, and the confidence threshold.
//! * [`heal`] — channel overrides, contact validity checks, and the
//!   one-decision-per-failure healing policy.

pub mod error;
pub mod heal;
pub mod mutate;
pub mod render;
pub mod types;
pub mod variants;

pub use error::{AdaptError, Result};
pub use heal::SelfHealer;
pub use mutate::Mutator;
pub use types::{ContactValidity, HealingAction, HealingDecision, MutationVerdict};
