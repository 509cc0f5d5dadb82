//! Tenant → umbrella assignment resolver with an in-process TTL cache.
//!
//! Assignments change rarely (admin reassignment), so every voice job
//! hitting the durable store would be wasted work. Entries — including
//! negative lookups — are cached for the configured TTL and dropped
//! eagerly on `invalidate`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use cadence_store::types::UmbrellaAssignment;
use cadence_store::Store;

use crate::error::Result;

struct CachedAssignment {
    assignment: Option<UmbrellaAssignment>,
    fetched_at: Instant,
}

pub struct UmbrellaResolver {
    store: Arc<Store>,
    cache: DashMap<String, CachedAssignment>,
    ttl: Duration,
}

impl UmbrellaResolver {
    pub fn new(store: Arc<Store>, ttl: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Look up the assignment for a tenant, serving from cache when fresh.
    /// `None` means the tenant has no active umbrella (also cached).
    pub fn resolve(&self, tenant_id: &str) -> Result<Option<UmbrellaAssignment>> {
        if let Some(entry) = self.cache.get(tenant_id) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.assignment.clone());
            }
        }

        let assignment = self.store.assignment_for_tenant(tenant_id)?;
        debug!(
            tenant_id,
            assigned = assignment.is_some(),
            "umbrella assignment fetched"
        );
        self.cache.insert(
            tenant_id.to_string(),
            CachedAssignment {
                assignment: assignment.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(assignment)
    }

    /// Drop the cached entry after a reassignment webhook/admin action.
    pub fn invalidate(&self, tenant_id: &str) {
        self.cache.remove(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_assignment() -> Arc<Store> {
        let store =
            Store::from_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        store
            .create_umbrella(&cadence_store::types::Umbrella {
                id: "u1".into(),
                name: "shared".into(),
                provider_org_id: None,
                provider_api_key: "key".into(),
                concurrency_limit: 6,
                last_reported_current: None,
                last_sync_at: None,
                active: true,
            })
            .unwrap();
        store.create_assignment("t1", "u1", 2, 1.0).unwrap();
        Arc::new(store)
    }

    #[test]
    fn resolves_and_caches() {
        let resolver = UmbrellaResolver::new(store_with_assignment(), Duration::from_secs(300));
        let a = resolver.resolve("t1").unwrap().unwrap();
        assert_eq!(a.umbrella_id.as_str(), "u1");
        assert_eq!(a.tenant_cap, 2);
        assert_eq!(a.concurrency_limit, 6);
        // Second call is served from cache (same values either way).
        assert!(resolver.resolve("t1").unwrap().is_some());
    }

    #[test]
    fn caches_negative_lookups_and_invalidates() {
        let store = store_with_assignment();
        let resolver = UmbrellaResolver::new(store.clone(), Duration::from_secs(300));
        assert!(resolver.resolve("t-unassigned").unwrap().is_none());

        // Assign after the negative result was cached.
        store.create_assignment("t-unassigned", "u1", 0, 1.0).unwrap();
        // Still cached...
        assert!(resolver.resolve("t-unassigned").unwrap().is_none());
        // ...until invalidated.
        resolver.invalidate("t-unassigned");
        assert!(resolver.resolve("t-unassigned").unwrap().is_some());
    }
}
