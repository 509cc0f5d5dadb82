//! The atomic slot operations. Every mutation is one Lua script so replicas
//! never observe a half-applied transition.
//!
//! Keys per umbrella `u`:
//!   `{ns}:umbrella:{u}`          hash: current, limit, last_sync
//!   `{ns}:umbrella:{u}:tenants`  hash: tenant id → usage count

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info, warn};

use crate::error::{Result, UmbrellaError};
use crate::types::{AcquireOutcome, UmbrellaSnapshot};

/// tryAcquire: reject on umbrella limit, then on tenant soft cap, else
/// increment both counters. The limit is passed in (resolver truth) and
/// stamped onto the hash so snapshots stay meaningful.
const TRY_ACQUIRE: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], 'current') or '0')
local limit = tonumber(ARGV[2])
local cap = tonumber(ARGV[3])

if current >= limit then
  return 'umbrella_full'
end
if cap > 0 then
  local usage = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '0')
  if usage >= cap then
    return 'tenant_cap'
  end
end

redis.call('HINCRBY', KEYS[1], 'current', 1)
redis.call('HSET', KEYS[1], 'limit', limit)
redis.call('HINCRBY', KEYS[2], ARGV[1], 1)
return 'acquired'
"#;

/// release: decrement both counters, never below zero. A double release
/// (webhook replay, shutdown racing a webhook) is absorbed silently.
const RELEASE: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], 'current') or '0')
if current > 0 then
  redis.call('HINCRBY', KEYS[1], 'current', -1)
end

local usage = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '0')
if usage > 1 then
  redis.call('HINCRBY', KEYS[2], ARGV[1], -1)
elseif usage == 1 then
  redis.call('HDEL', KEYS[2], ARGV[1])
end
return 'ok'
"#;

/// syncFromWebhook: clamp to provider truth. The tenant map is left alone —
/// per-tenant totals may now disagree with the sum, which is fine because
/// the cap is a soft fairness control.
const SYNC: &str = r#"
redis.call('HSET', KEYS[1],
  'current', ARGV[1],
  'limit', ARGV[2],
  'last_sync', ARGV[3])
return 'ok'
"#;

const CLEANUP_TENANT: &str = r#"
redis.call('HDEL', KEYS[1], ARGV[1])
return 'ok'
"#;

/// Handle to the coordination-store side of the UCM. Cheap to clone.
#[derive(Clone)]
pub struct UmbrellaCoordinator {
    conn: ConnectionManager,
    namespace: String,
}

impl UmbrellaCoordinator {
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }

    pub fn from_manager(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            namespace: namespace.to_string(),
        }
    }

    /// Attempt to take one slot for `tenant` under umbrella `umbrella_id`.
    pub async fn try_acquire(
        &self,
        umbrella_id: &str,
        tenant_id: &str,
        limit: u32,
        tenant_cap: u32,
    ) -> Result<AcquireOutcome> {
        let mut conn = self.conn.clone();
        let reply: String = Script::new(TRY_ACQUIRE)
            .key(self.state_key(umbrella_id))
            .key(self.tenants_key(umbrella_id))
            .arg(tenant_id)
            .arg(limit)
            .arg(tenant_cap)
            .invoke_async(&mut conn)
            .await?;
        let outcome: AcquireOutcome = reply
            .parse()
            .map_err(UmbrellaError::BadScriptReply)?;
        debug!(umbrella_id, tenant_id, limit, tenant_cap, %outcome, "slot acquisition");
        Ok(outcome)
    }

    /// Release one slot. Safe against double release.
    pub async fn release(&self, umbrella_id: &str, tenant_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = Script::new(RELEASE)
            .key(self.state_key(umbrella_id))
            .key(self.tenants_key(umbrella_id))
            .arg(tenant_id)
            .invoke_async(&mut conn)
            .await?;
        debug!(umbrella_id, tenant_id, "slot released");
        Ok(())
    }

    /// Overwrite the counters with provider-reported truth.
    pub async fn sync_from_webhook(
        &self,
        umbrella_id: &str,
        reported_current: u32,
        reported_limit: u32,
    ) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let _: String = Script::new(SYNC)
            .key(self.state_key(umbrella_id))
            .arg(reported_current)
            .arg(reported_limit)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        info!(
            umbrella_id,
            reported_current, reported_limit, "umbrella counters synced from webhook"
        );
        Ok(())
    }

    /// Drop a tenant's usage entry (reassignment).
    pub async fn cleanup_tenant(&self, umbrella_id: &str, tenant_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = Script::new(CLEANUP_TENANT)
            .key(self.tenants_key(umbrella_id))
            .arg(tenant_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Read-only snapshot for health reporting and stale-sync detection.
    pub async fn snapshot(&self, umbrella_id: &str) -> Result<UmbrellaSnapshot> {
        let mut conn = self.conn.clone();
        let (state, usage): (Vec<Option<String>>, Vec<(String, u32)>) = redis::pipe()
            .cmd("HMGET")
            .arg(self.state_key(umbrella_id))
            .arg("current")
            .arg("limit")
            .arg("last_sync")
            .cmd("HGETALL")
            .arg(self.tenants_key(umbrella_id))
            .query_async(&mut conn)
            .await?;

        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.parse::<u32>().ok());
        let snapshot = UmbrellaSnapshot {
            current: parse(state.first().unwrap_or(&None)).unwrap_or(0),
            limit: parse(state.get(1).unwrap_or(&None)).unwrap_or(0),
            last_sync_ms: state
                .get(2)
                .and_then(|v| v.as_deref())
                .and_then(|s| s.parse::<i64>().ok()),
            tenant_usage: usage,
        };

        if snapshot.current > snapshot.limit && snapshot.limit > 0 {
            warn!(
                umbrella_id,
                current = snapshot.current,
                limit = snapshot.limit,
                "umbrella counter above limit (awaiting sync clamp)"
            );
        }
        Ok(snapshot)
    }

    fn state_key(&self, umbrella_id: &str) -> String {
        format!("{}:umbrella:{}", self.namespace, umbrella_id)
    }

    fn tenants_key(&self, umbrella_id: &str) -> String {
        format!("{}:umbrella:{}:tenants", self.namespace, umbrella_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory mirror of the script semantics. The Lua source above is the
    /// runtime truth; this model exists so the acquisition laws are pinned
    /// down in unit tests without a live coordination store.
    #[derive(Default)]
    struct Model {
        current: u32,
        tenants: std::collections::HashMap<String, u32>,
    }

    impl Model {
        fn try_acquire(&mut self, tenant: &str, limit: u32, cap: u32) -> AcquireOutcome {
            if self.current >= limit {
                return AcquireOutcome::UmbrellaFull;
            }
            if cap > 0 && self.tenants.get(tenant).copied().unwrap_or(0) >= cap {
                return AcquireOutcome::TenantCap;
            }
            self.current += 1;
            *self.tenants.entry(tenant.to_string()).or_insert(0) += 1;
            AcquireOutcome::Acquired
        }

        fn release(&mut self, tenant: &str) {
            self.current = self.current.saturating_sub(1);
            match self.tenants.get_mut(tenant) {
                Some(u) if *u > 1 => *u -= 1,
                Some(_) => {
                    self.tenants.remove(tenant);
                }
                None => {}
            }
        }

        fn sync(&mut self, reported: u32) {
            self.current = reported;
        }
    }

    #[test]
    fn acquire_then_release_restores_counters() {
        let mut m = Model::default();
        assert!(m.try_acquire("a", 5, 0).is_acquired());
        assert_eq!(m.current, 1);
        m.release("a");
        assert_eq!(m.current, 0);
        assert!(m.tenants.is_empty());
    }

    #[test]
    fn current_never_exceeds_limit_under_contention() {
        let mut m = Model::default();
        let mut acquired = 0;
        for i in 0..20 {
            if m.try_acquire(&format!("t{}", i % 4), 5, 0).is_acquired() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 5);
        assert_eq!(m.current, 5);
        assert_eq!(m.try_acquire("t9", 5, 0), AcquireOutcome::UmbrellaFull);
    }

    #[test]
    fn tenant_cap_rejects_before_umbrella_limit() {
        let mut m = Model::default();
        assert!(m.try_acquire("a", 10, 2).is_acquired());
        assert!(m.try_acquire("a", 10, 2).is_acquired());
        assert_eq!(m.try_acquire("a", 10, 2), AcquireOutcome::TenantCap);
        // Another tenant still fits.
        assert!(m.try_acquire("b", 10, 2).is_acquired());
        assert_eq!(m.current, 3);
    }

    #[test]
    fn zero_cap_means_uncapped() {
        let mut m = Model::default();
        for _ in 0..7 {
            assert!(m.try_acquire("a", 8, 0).is_acquired());
        }
        assert_eq!(m.current, 7);
    }

    #[test]
    fn double_release_is_absorbed() {
        let mut m = Model::default();
        assert!(m.try_acquire("a", 5, 0).is_acquired());
        m.release("a");
        m.release("a");
        assert_eq!(m.current, 0);
    }

    #[test]
    fn capacity_overflow_scenario() {
        // Umbrella limit 2, tenants A and B each holding one slot.
        let mut m = Model::default();
        assert!(m.try_acquire("a", 2, 0).is_acquired());
        assert!(m.try_acquire("b", 2, 0).is_acquired());

        // Third call rejected.
        assert_eq!(m.try_acquire("a", 2, 0), AcquireOutcome::UmbrellaFull);

        // Provider reports one call ended; sync clamps the total.
        m.sync(1);
        assert!(m.try_acquire("a", 2, 0).is_acquired());
        assert_eq!(m.current, 2);
        // Tenant map may now exceed the clamped total: drift is allowed.
        assert_eq!(m.tenants["a"], 2);
        assert_eq!(m.tenants["b"], 1);
    }

    #[test]
    fn sync_age_is_reported() {
        let snap = UmbrellaSnapshot {
            current: 1,
            limit: 4,
            last_sync_ms: Some(1_000),
            tenant_usage: vec![],
        };
        assert_eq!(snap.sync_age_ms(301_000), Some(300_000));
    }

    #[test]
    fn outcome_strings_round_trip() {
        for s in ["acquired", "umbrella_full", "tenant_cap"] {
            let o: AcquireOutcome = s.parse().unwrap();
            assert_eq!(o.to_string(), s);
        }
    }
}
