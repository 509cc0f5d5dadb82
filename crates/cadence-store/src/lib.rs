//! `cadence-store` — the durable store.
//!
//! Enrollments, sequences, interactions, mutations, audit logs, umbrella
//! rows. A single [`Store`] wraps one SQLite connection behind a `Mutex`;
//! query groups live in per-entity modules (`enrollments`, `catalog`,
//! `interactions`, `audit`) as `impl Store` blocks.
//!
//! All timestamps are RFC 3339 UTC strings. Interaction, mutation, and
//! audit tables are append-only; schema evolution is additive.

pub mod audit;
pub mod catalog;
pub mod db;
pub mod enrollments;
pub mod error;
pub mod interactions;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::Store;
