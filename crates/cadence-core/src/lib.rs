//! `cadence-core` — shared types, configuration, and the time service.
//!
//! Everything the other Cadence crates agree on lives here: opaque
//! identifiers, the channel/status/urgency enums, the tagged step-content
//! payload, the fixed emotional-analysis shape, figment-based configuration,
//! and the centralized timezone arithmetic (business hours + compliance
//! windows). Business logic elsewhere never calls wall-clock or timezone
//! utilities directly — it goes through [`clock`].

pub mod analysis;
pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use error::{CadenceError, Result};
