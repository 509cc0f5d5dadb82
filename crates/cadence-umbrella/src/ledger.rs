//! In-process registry of slots this process acquired and has not yet
//! observed released. Graceful shutdown drains it so a dying replica never
//! strands capacity until the next webhook sync.

use dashmap::DashMap;
use tracing::info;

use crate::coordinator::UmbrellaCoordinator;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldSlot {
    pub umbrella_id: String,
    pub tenant_id: String,
}

/// Keyed by provider call id once the call is placed (job id before that,
/// swapped via [`SlotLedger::rekey`]).
#[derive(Default)]
pub struct SlotLedger {
    held: DashMap<String, HeldSlot>,
}

impl SlotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, key: &str, umbrella_id: &str, tenant_id: &str) {
        self.held.insert(
            key.to_string(),
            HeldSlot {
                umbrella_id: umbrella_id.to_string(),
                tenant_id: tenant_id.to_string(),
            },
        );
    }

    /// Re-key a hold from the internal job id to the provider call id once
    /// the provider has assigned one.
    pub fn rekey(&self, old_key: &str, new_key: &str) {
        if let Some((_, slot)) = self.held.remove(old_key) {
            self.held.insert(new_key.to_string(), slot);
        }
    }

    /// Remove a hold (slot released elsewhere). Returns the slot if this
    /// process was tracking it.
    pub fn forget(&self, key: &str) -> Option<HeldSlot> {
        self.held.remove(key).map(|(_, slot)| slot)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release every held slot through the coordinator. Called at the end
    /// of graceful drain; released entries are removed even when the redis
    /// call fails (the sync webhook is the backstop).
    pub async fn release_all(&self, coordinator: &UmbrellaCoordinator) -> Result<usize> {
        let keys: Vec<String> = self.held.iter().map(|e| e.key().clone()).collect();
        let mut released = 0usize;
        for key in keys {
            if let Some((_, slot)) = self.held.remove(&key) {
                coordinator
                    .release(&slot.umbrella_id, &slot.tenant_id)
                    .await?;
                released += 1;
            }
        }
        if released > 0 {
            info!(released, "held umbrella slots released on shutdown");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_rekey_forget_round_trip() {
        let ledger = SlotLedger::new();
        ledger.hold("job-1", "u1", "t1");
        assert_eq!(ledger.len(), 1);

        ledger.rekey("job-1", "call-77");
        assert!(ledger.forget("job-1").is_none());
        let slot = ledger.forget("call-77").unwrap();
        assert_eq!(slot.umbrella_id, "u1");
        assert_eq!(slot.tenant_id, "t1");
        assert!(ledger.is_empty());
    }

    #[test]
    fn rekey_of_unknown_key_is_a_noop() {
        let ledger = SlotLedger::new();
        ledger.rekey("missing", "call-1");
        assert!(ledger.is_empty());
    }
}
