//! `cadence-umbrella` — distributed slot accounting for shared outbound
//! voice accounts.
//!
//! An umbrella is one provider account whose total-outstanding-calls limit
//! is multiplexed across many tenants. The counters live in the
//! coordination store and are mutated only through atomic Lua scripts:
//! in-process counters are never trusted across replicas. Per-tenant caps
//! are a soft fairness control — webhook sync may let the tenant map drift
//! from the clamped total, and that is acceptable.

pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod resolver;
pub mod types;

pub use coordinator::UmbrellaCoordinator;
pub use error::{Result, UmbrellaError};
pub use ledger::SlotLedger;
pub use resolver::UmbrellaResolver;
pub use types::{AcquireOutcome, UmbrellaSnapshot};
