use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{BusError, Result};
use crate::types::JobEnvelope;

/// FIFO sequence numbers within one priority band. 2^40 leaves the combined
/// score well inside f64's exact-integer range (priority ≤ 8 → score < 2^44).
const PRIORITY_BAND: u64 = 1 << 40;

/// The five typed queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Sms,
    Email,
    Voice,
    Events,
    Healing,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::Sms,
        QueueName::Email,
        QueueName::Voice,
        QueueName::Events,
        QueueName::Healing,
    ];
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueName::Sms => "sms",
            QueueName::Email => "email",
            QueueName::Voice => "voice",
            QueueName::Events => "events",
            QueueName::Healing => "healing",
        };
        write!(f, "{s}")
    }
}

/// Promote due members from `delayed` (and expired lock leases from
/// `processing`) into `ready`, then pop the ready head. When a lease is
/// requested the popped member is parked in `processing` until `ack` — a
/// worker that dies mid-job has its job redelivered once the lease lapses.
/// Runs as one atomic script so concurrent workers never double-pop.
const PROMOTE_AND_POP: &str = r#"
local delayed = KEYS[1]
local ready = KEYS[2]
local seqkey = KEYS[3]
local processing = KEYS[4]
local now = tonumber(ARGV[1])
local band = tonumber(ARGV[2])
local lease_ms = tonumber(ARGV[3])

local function into_ready(member)
  local ok, job = pcall(cjson.decode, member)
  local prio = 5
  if ok and type(job) == 'table' and tonumber(job['priority']) then
    prio = tonumber(job['priority'])
  end
  local seq = redis.call('INCR', seqkey)
  redis.call('ZADD', ready, prio * band + seq, member)
end

local expired = redis.call('ZRANGEBYSCORE', processing, '-inf', now)
if #expired > 0 then
  for _, member in ipairs(expired) do
    into_ready(member)
  end
  redis.call('ZREMRANGEBYSCORE', processing, '-inf', now)
end

local due = redis.call('ZRANGEBYSCORE', delayed, '-inf', now)
if #due > 0 then
  for _, member in ipairs(due) do
    into_ready(member)
  end
  redis.call('ZREMRANGEBYSCORE', delayed, '-inf', now)
end

local popped = redis.call('ZPOPMIN', ready, 1)
if #popped == 0 then
  return false
end
if lease_ms > 0 then
  redis.call('ZADD', processing, now + lease_ms, popped[1])
end
return popped[1]
"#;

/// A leased job: the raw member string is what `ack` removes from the
/// processing set, so it must be returned exactly as popped.
#[derive(Debug)]
pub struct Delivery<T> {
    pub envelope: JobEnvelope<T>,
    raw: String,
}

/// Handle to the job bus. Cheap to clone (the connection manager
/// multiplexes a single connection).
#[derive(Clone)]
pub struct JobBus {
    conn: ConnectionManager,
    namespace: String,
}

impl JobBus {
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

    /// Enqueue a payload with the given priority, visible after
    /// `delay_secs`. Returns the job id.
    pub async fn enqueue<T: Serialize>(
        &self,
        queue: QueueName,
        payload: &T,
        priority: u8,
        delay_secs: u64,
    ) -> Result<String> {
        let envelope = JobEnvelope {
            id: Uuid::new_v4().to_string(),
            priority,
            attempt: 1,
            enqueued_at: Utc::now().to_rfc3339(),
            payload,
        };
        let id = envelope.id.clone();
        self.push(queue, &envelope, delay_secs).await?;
        debug!(queue = %queue, job_id = %id, priority, delay_secs, "job enqueued");
        Ok(id)
    }

    /// Re-enqueue an existing envelope (capacity rejection, provider retry),
    /// bumping the attempt counter while keeping id and priority.
    pub async fn re_enqueue<T: Serialize>(
        &self,
        queue: QueueName,
        envelope: &JobEnvelope<T>,
        delay_secs: u64,
    ) -> Result<()> {
        let bumped = JobEnvelope {
            id: envelope.id.clone(),
            priority: envelope.priority,
            attempt: envelope.attempt + 1,
            enqueued_at: envelope.enqueued_at.clone(),
            payload: &envelope.payload,
        };
        self.push(queue, &bumped, delay_secs).await?;
        debug!(queue = %queue, job_id = %envelope.id, attempt = bumped.attempt, delay_secs, "job re-enqueued");
        Ok(())
    }

    /// Pop the highest-priority due job, or `None` when the queue is idle.
    /// At-most-once delivery; use [`JobBus::pop_leased`] where a crash must
    /// redeliver.
    pub async fn pop<T: DeserializeOwned>(&self, queue: QueueName) -> Result<Option<JobEnvelope<T>>> {
        Ok(self.pop_raw(queue, 0).await?.map(|d| d.envelope))
    }

    /// Pop with a lock lease: the job stays parked in the processing set
    /// and is redelivered if not [`JobBus::ack`]ed within `lease_secs`.
    /// Handlers on leased queues must be idempotent.
    pub async fn pop_leased<T: DeserializeOwned>(
        &self,
        queue: QueueName,
        lease_secs: u64,
    ) -> Result<Option<Delivery<T>>> {
        self.pop_raw(queue, lease_secs * 1000).await
    }

    /// Complete a leased job so it will not be redelivered.
    pub async fn ack<T>(&self, queue: QueueName, delivery: &Delivery<T>) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("ZREM")
            .arg(self.processing_key(queue))
            .arg(&delivery.raw)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_raw<T: DeserializeOwned>(
        &self,
        queue: QueueName,
        lease_ms: u64,
    ) -> Result<Option<Delivery<T>>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let raw: Option<String> = Script::new(PROMOTE_AND_POP)
            .key(self.delayed_key(queue))
            .key(self.ready_key(queue))
            .key(self.seq_key(queue))
            .key(self.processing_key(queue))
            .arg(now_ms)
            .arg(PRIORITY_BAND)
            .arg(lease_ms)
            .invoke_async(&mut conn)
            .await?;

        match raw {
            None => Ok(None),
            Some(json) => {
                let envelope =
                    serde_json::from_str(&json).map_err(|e| BusError::MalformedJob {
                        queue: queue.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(Delivery {
                    envelope,
                    raw: json,
                }))
            }
        }
    }

    /// Delayed + ready depth, for the health snapshot.
    pub async fn depth(&self, queue: QueueName) -> Result<u64> {
        let mut conn = self.conn.clone();
        let (delayed, ready): (u64, u64) = redis::pipe()
            .zcard(self.delayed_key(queue))
            .zcard(self.ready_key(queue))
            .query_async(&mut conn)
            .await?;
        Ok(delayed + ready)
    }

    async fn push<T: Serialize>(
        &self,
        queue: QueueName,
        envelope: &JobEnvelope<T>,
        delay_secs: u64,
    ) -> Result<()> {
        let member = serde_json::to_string(envelope)?;
        let ready_at_ms = Utc::now().timestamp_millis() + (delay_secs as i64) * 1000;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("ZADD")
            .arg(self.delayed_key(queue))
            .arg(ready_at_ms)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn delayed_key(&self, queue: QueueName) -> String {
        format!("{}:bus:{}:delayed", self.namespace, queue)
    }

    fn ready_key(&self, queue: QueueName) -> String {
        format!("{}:bus:{}:ready", self.namespace, queue)
    }

    fn seq_key(&self, queue: QueueName) -> String {
        format!("{}:bus:{}:seq", self.namespace, queue)
    }

    fn processing_key(&self, queue: QueueName) -> String {
        format!("{}:bus:{}:processing", self.namespace, queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_are_stable_wire_identifiers() {
        let names: Vec<String> = QueueName::ALL.iter().map(|q| q.to_string()).collect();
        assert_eq!(names, ["sms", "email", "voice", "events", "healing"]);
    }

    #[test]
    fn priority_band_keeps_scores_exact() {
        // Highest channel priority is 8; one billion enqueues still fit the
        // f64 mantissa exactly.
        let worst = 8u64 * PRIORITY_BAND + 1_000_000_000;
        assert!(worst < (1u64 << 53));
        assert_eq!(worst as f64 as u64, worst);
    }

    #[test]
    fn envelope_round_trips_with_payload() {
        let envelope = JobEnvelope {
            id: "job-1".into(),
            priority: 3,
            attempt: 2,
            enqueued_at: "2025-01-01T00:00:00+00:00".into(),
            payload: crate::types::SmsJob {
                tenant_id: "t1".into(),
                enrollment_id: "e1".into(),
                step_id: "st1".into(),
                step_order: 1,
                contact_id: "c1".into(),
                phone: "+15551234567".into(),
                body: "hi".into(),
                retry: 0,
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: JobEnvelope<crate::types::SmsJob> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "job-1");
        assert_eq!(back.attempt, 2);
        assert_eq!(back.payload.phone, "+15551234567");
    }
}
