//! Append-only audit surfaces: mutation records, the execution log (which
//! also carries the exactly-once slot-release marker), healing decisions,
//! and notifications for external UI consumption.

use rusqlite::params;
use uuid::Uuid;

use crate::error::Result;
use crate::store::Store;
use crate::types::{ExecutionRecord, HealingRecord, MutationRecord, Notification};

impl Store {
    /// Persist an applied mutation for audit and later attribution.
    pub fn record_mutation(&self, m: &MutationRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO mutations
             (id, enrollment_id, step_id, step_order, channel, original, rewritten,
              confidence, aggressiveness, model, resulted_in_reply,
              resulted_in_conversion, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                m.id,
                m.enrollment_id.as_str(),
                m.step_id,
                m.step_order,
                m.channel.to_string(),
                serde_json::to_string(&m.original)?,
                serde_json::to_string(&m.rewritten)?,
                m.confidence,
                m.aggressiveness.to_string(),
                m.model,
                m.resulted_in_reply,
                m.resulted_in_conversion,
                m.created_at,
            ],
        )?;
        Ok(())
    }

    /// Flag the most recent mutation for an enrollment as having led to a
    /// reply and/or a conversion (A/B-style outcome attribution).
    pub fn mark_mutation_result(
        &self,
        enrollment_id: &str,
        replied: bool,
        converted: bool,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE mutations
             SET resulted_in_reply = resulted_in_reply | ?1,
                 resulted_in_conversion = resulted_in_conversion | ?2
             WHERE id = (SELECT id FROM mutations
                         WHERE enrollment_id = ?3
                         ORDER BY created_at DESC LIMIT 1)",
            params![replied, converted, enrollment_id],
        )?;
        Ok(())
    }

    pub fn log_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO execution_log
             (id, tenant_id, enrollment_id, step_order, action, status,
              provider_call_id, detail, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                Uuid::now_v7().to_string(),
                record.tenant_id,
                record.enrollment_id,
                record.step_order,
                record.action,
                record.status,
                record.provider_call_id,
                record.detail,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    /// Exactly-once marker per (provider call id, action): the unique index
    /// on `(provider_call_id, action)` makes the second insert a no-op, and
    /// the returned `false` tells the caller the action already happened.
    pub fn try_mark_once(
        &self,
        tenant_id: &str,
        provider_call_id: &str,
        action: &str,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "INSERT OR IGNORE INTO execution_log
             (id, tenant_id, enrollment_id, step_order, action, status,
              provider_call_id, detail, created_at)
             VALUES (?1, ?2, NULL, NULL, ?3, 'ok', ?4, NULL, ?5)",
            params![
                Uuid::now_v7().to_string(),
                tenant_id,
                action,
                provider_call_id,
                Self::now()
            ],
        )?;
        Ok(n > 0)
    }

    /// Exactly-once umbrella slot release per provider call id.
    pub fn try_mark_slot_released(&self, tenant_id: &str, provider_call_id: &str) -> Result<bool> {
        self.try_mark_once(tenant_id, provider_call_id, "slot_released")
    }

    pub fn log_healing(&self, record: &HealingRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO healing_log
             (id, enrollment_id, step_order, failure_type, action, detail, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                Uuid::now_v7().to_string(),
                record.enrollment_id,
                record.step_order,
                record.failure_type,
                record.action,
                record.detail,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    pub fn healing_count(&self, enrollment_id: &str) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let n: u64 = db.query_row(
            "SELECT COUNT(*) FROM healing_log WHERE enrollment_id = ?1",
            params![enrollment_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn notify(&self, n: &Notification) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO notifications
             (id, tenant_id, enrollment_id, contact_id, kind, severity, payload, read, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,0,?8)",
            params![
                Uuid::now_v7().to_string(),
                n.tenant_id,
                n.enrollment_id,
                n.contact_id,
                n.kind,
                n.severity,
                n.payload.to_string(),
                Self::now(),
            ],
        )?;
        Ok(())
    }

    /// Unread notifications for a tenant, newest first (UI polling).
    pub fn unread_notifications(&self, tenant_id: &str, limit: usize) -> Result<Vec<(String, String)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "SELECT kind, payload FROM notifications
             WHERE tenant_id = ?1 AND read = 0
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tenant_id, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        Store::from_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn slot_release_marker_fires_exactly_once() {
        let store = test_store();
        assert!(store.try_mark_slot_released("t1", "call-1").unwrap());
        assert!(!store.try_mark_slot_released("t1", "call-1").unwrap());
        assert!(store.try_mark_slot_released("t1", "call-2").unwrap());
    }

    #[test]
    fn execution_log_accepts_capacity_skip() {
        let store = test_store();
        store
            .log_execution(&ExecutionRecord {
                tenant_id: "t1".into(),
                enrollment_id: Some("e1".into()),
                step_order: Some(2),
                action: "skipped_capacity".into(),
                status: "capacity_exhausted".into(),
                provider_call_id: None,
                detail: Some("3 acquisition attempts failed".into()),
            })
            .unwrap();
    }

    #[test]
    fn mutation_attribution_marks_latest_row() {
        use cadence_core::types::{Channel, EnrollmentId, MutationAggressiveness, StepContent};

        let store = test_store();
        let base = MutationRecord {
            id: "m1".into(),
            enrollment_id: EnrollmentId("e1".into()),
            step_id: "st1".into(),
            step_order: 2,
            channel: Channel::Sms,
            original: StepContent::Sms { body: "a".into() },
            rewritten: StepContent::Sms { body: "b".into() },
            confidence: 0.8,
            aggressiveness: MutationAggressiveness::Moderate,
            model: "claude-sonnet-4-6".into(),
            resulted_in_reply: false,
            resulted_in_conversion: false,
            created_at: "2025-01-01T00:00:00+00:00".into(),
        };
        store.record_mutation(&base).unwrap();

        store.mark_mutation_result("e1", true, false).unwrap();

        let db = store.db.lock().unwrap();
        let replied: bool = db
            .query_row(
                "SELECT resulted_in_reply FROM mutations WHERE id = 'm1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(replied);
    }
}
