//! Enrollment queries: the due batch, advancement, status transitions, and
//! the flag/cache writes shared between the scheduler, the event processor,
//! and the self-healer.
//!
//! Field authority: the scheduler writes advancement and `completed`; the
//! event processor writes `booked`, `replied`, and `manual_stop`; the healer
//! writes channel overrides and failure history. Advancement is guarded so
//! `current_step_order` can never decrease.

use rusqlite::params;
use tracing::debug;

use cadence_core::analysis::EmotionalState;
use cadence_core::types::{Channel, EnrollmentStatus, FailureRecord};

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::Enrollment;

const ENROLLMENT_COLUMNS: &str = "id, tenant_id, contact_id, sequence_id, current_step_order,
    next_fire_time, status, status_reason, custom_variables, contact_replied,
    answered_call, appointment_booked, needs_human_intervention, emotional_state,
    channel_overrides, failure_history, selected_variants, total_attempts,
    enrolled_at, updated_at";

impl Store {
    /// Insert a new enrollment row (the enrollment API and tests).
    pub fn create_enrollment(&self, e: &Enrollment) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO enrollments
             (id, tenant_id, contact_id, sequence_id, current_step_order,
              next_fire_time, status, status_reason, custom_variables,
              contact_replied, answered_call, appointment_booked,
              needs_human_intervention, emotional_state, channel_overrides,
              failure_history, selected_variants, total_attempts,
              enrolled_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
            params![
                e.id.as_str(),
                e.tenant_id.as_str(),
                e.contact_id.as_str(),
                e.sequence_id,
                e.current_step_order,
                e.next_fire_time,
                e.status.to_string(),
                e.status_reason,
                serde_json::to_string(&e.custom_variables)?,
                e.contact_replied,
                e.answered_call,
                e.appointment_booked,
                e.needs_human_intervention,
                serde_json::to_string(&e.emotional_state)?,
                serde_json::to_string(&e.channel_overrides)?,
                serde_json::to_string(&e.failure_history)?,
                serde_json::to_string(&e.selected_variants)?,
                e.total_attempts,
                e.enrolled_at,
                e.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Active enrollments due at or before `now`, oldest fire time first.
    /// This is the scheduler's per-tick batch query.
    pub fn due_enrollments(&self, now: &str, limit: u32) -> Result<Vec<Enrollment>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
             WHERE status = 'active' AND next_fire_time IS NOT NULL AND next_fire_time <= ?1
             ORDER BY next_fire_time ASC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![now, limit], row_to_enrollment)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn enrollment(&self, id: &str) -> Result<Option<Enrollment>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?1"),
            params![id],
            row_to_enrollment,
        ) {
            Ok(e) => Ok(Some(e)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Advance after a successful dispatch enqueue: bump the step order,
    /// set the next fire time, and count the attempt. The `current_step_order`
    /// guard makes the write a no-op if another tick advanced first.
    pub fn advance_after_dispatch(
        &self,
        id: &str,
        new_order: u32,
        next_fire_time: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE enrollments
             SET current_step_order = ?1,
                 next_fire_time = ?2,
                 total_attempts = total_attempts + 1,
                 updated_at = ?3
             WHERE id = ?4 AND current_step_order < ?1",
            params![new_order, next_fire_time, Self::now(), id],
        )?;
        Ok(n > 0)
    }

    /// Advance over a skipped step (skip condition matched, nothing sent).
    pub fn advance_skipped(&self, id: &str, new_order: u32, next_fire_time: Option<&str>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE enrollments
             SET current_step_order = ?1, next_fire_time = ?2, updated_at = ?3
             WHERE id = ?4 AND current_step_order < ?1",
            params![new_order, next_fire_time, Self::now(), id],
        )?;
        Ok(n > 0)
    }

    /// Push the fire time without advancing (business-hours / compliance
    /// deferral, or a dispatch that must be retried next tick).
    pub fn reschedule(&self, id: &str, next_fire_time: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE enrollments SET next_fire_time = ?1, updated_at = ?2 WHERE id = ?3",
            params![next_fire_time, Self::now(), id],
        )?;
        Ok(())
    }

    /// Sequence exhausted: terminal `completed`, fire time cleared.
    pub fn complete_enrollment(&self, id: &str) -> Result<()> {
        self.set_terminal(id, EnrollmentStatus::Completed, None)
    }

    pub fn fail_enrollment(&self, id: &str, reason: &str) -> Result<()> {
        self.set_terminal(id, EnrollmentStatus::Failed, Some(reason))
    }

    pub fn manual_stop(&self, id: &str) -> Result<()> {
        self.set_terminal(id, EnrollmentStatus::ManualStop, None)
    }

    /// Idempotent booking shortcut: flag + terminal `booked` + cleared fire
    /// time in one statement.
    pub fn mark_booked(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE enrollments
             SET appointment_booked = 1, status = 'booked',
                 next_fire_time = NULL, updated_at = ?1
             WHERE id = ?2",
            params![Self::now(), id],
        )?;
        Ok(())
    }

    /// Record an inbound reply. `stop` comes from the sequence's
    /// stop-on-reply flag: when set the enrollment leaves the active pool.
    pub fn mark_replied(&self, id: &str, stop: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        if stop {
            db.execute(
                "UPDATE enrollments
                 SET contact_replied = 1, status = 'replied', updated_at = ?1
                 WHERE id = ?2 AND status = 'active'",
                params![Self::now(), id],
            )?;
        } else {
            db.execute(
                "UPDATE enrollments SET contact_replied = 1, updated_at = ?1 WHERE id = ?2",
                params![Self::now(), id],
            )?;
        }
        Ok(())
    }

    pub fn mark_answered_call(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE enrollments SET answered_call = 1, updated_at = ?1 WHERE id = ?2",
            params![Self::now(), id],
        )?;
        Ok(())
    }

    pub fn set_needs_human(&self, id: &str, value: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE enrollments SET needs_human_intervention = ?1, updated_at = ?2 WHERE id = ?3",
            params![value, Self::now(), id],
        )?;
        Ok(())
    }

    /// Refresh the cached emotional state (event processor authority).
    pub fn update_emotional_state(&self, id: &str, state: &EmotionalState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE enrollments SET emotional_state = ?1, updated_at = ?2 WHERE id = ?3",
            params![json, Self::now(), id],
        )?;
        Ok(())
    }

    /// Install a channel substitution (self-healer authority). Read-modify-
    /// write happens inside the connection lock, so overrides cannot race.
    pub fn set_channel_override(&self, id: &str, from: Channel, to: Channel) -> Result<()> {
        let db = self.db.lock().unwrap();
        let current: String = db.query_row(
            "SELECT channel_overrides FROM enrollments WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let mut overrides: std::collections::HashMap<Channel, Channel> =
            serde_json::from_str(&current).unwrap_or_default();
        overrides.insert(from, to);
        db.execute(
            "UPDATE enrollments SET channel_overrides = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&overrides)?, Self::now(), id],
        )?;
        debug!(enrollment_id = %id, %from, %to, "channel override installed");
        Ok(())
    }

    /// Append a failure record to the enrollment's healing history.
    pub fn append_failure(&self, id: &str, record: &FailureRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        let current: String = db.query_row(
            "SELECT failure_history FROM enrollments WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let mut history: Vec<FailureRecord> = serde_json::from_str(&current).unwrap_or_default();
        history.push(record.clone());
        db.execute(
            "UPDATE enrollments SET failure_history = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&history)?, Self::now(), id],
        )?;
        Ok(())
    }

    /// Record which A/B variant was drawn for a step (attribution).
    pub fn record_selected_variant(&self, id: &str, step_order: u32, variant_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let current: String = db.query_row(
            "SELECT selected_variants FROM enrollments WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let mut selected: std::collections::HashMap<String, String> =
            serde_json::from_str(&current).unwrap_or_default();
        selected.insert(step_order.to_string(), variant_id.to_string());
        db.execute(
            "UPDATE enrollments SET selected_variants = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&selected)?, Self::now(), id],
        )?;
        Ok(())
    }

    /// Most recently touched live enrollment reachable from a phone number
    /// (inbound SMS without a metadata envelope).
    pub fn live_enrollment_for_phone(&self, phone: &str) -> Result<Option<Enrollment>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
                 WHERE status IN ('active', 'paused', 'replied')
                   AND contact_id IN (SELECT id FROM contacts WHERE phone = ?1)
                 ORDER BY updated_at DESC
                 LIMIT 1"
            ),
            params![phone],
            row_to_enrollment,
        ) {
            Ok(e) => Ok(Some(e)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Status counts for the health endpoint.
    pub fn enrollment_status_counts(&self) -> Result<Vec<(String, u64)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT status, COUNT(*) FROM enrollments GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn set_terminal(&self, id: &str, status: EnrollmentStatus, reason: Option<&str>) -> Result<()> {
        debug_assert!(status.is_terminal());
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE enrollments
             SET status = ?1, status_reason = ?2, next_fire_time = NULL, updated_at = ?3
             WHERE id = ?4",
            params![status.to_string(), reason, Self::now(), id],
        )?;
        Ok(())
    }
}

pub(crate) fn row_to_enrollment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Enrollment> {
    let status_str: String = row.get(6)?;
    let custom_variables: String = row.get(8)?;
    let emotional_state: String = row.get(13)?;
    let channel_overrides: String = row.get(14)?;
    let failure_history: String = row.get(15)?;
    let selected_variants: String = row.get(16)?;
    Ok(Enrollment {
        id: row.get::<_, String>(0)?.into(),
        tenant_id: row.get::<_, String>(1)?.into(),
        contact_id: row.get::<_, String>(2)?.into(),
        sequence_id: row.get(3)?,
        current_step_order: row.get(4)?,
        next_fire_time: row.get(5)?,
        status: status_str.parse().unwrap_or(EnrollmentStatus::Active),
        status_reason: row.get(7)?,
        custom_variables: serde_json::from_str(&custom_variables).unwrap_or_default(),
        contact_replied: row.get(9)?,
        answered_call: row.get(10)?,
        appointment_booked: row.get(11)?,
        needs_human_intervention: row.get(12)?,
        emotional_state: serde_json::from_str(&emotional_state).unwrap_or_default(),
        channel_overrides: serde_json::from_str(&channel_overrides).unwrap_or_default(),
        failure_history: serde_json::from_str(&failure_history).unwrap_or_default(),
        selected_variants: serde_json::from_str(&selected_variants).unwrap_or_default(),
        total_attempts: row.get(17)?,
        enrolled_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Enrollment;
    use cadence_core::types::EnrollmentId;

    fn test_store() -> Store {
        Store::from_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap()
    }

    fn sample_enrollment(next_fire: Option<&str>) -> Enrollment {
        let now = chrono::Utc::now().to_rfc3339();
        Enrollment {
            id: EnrollmentId::new(),
            tenant_id: "t1".into(),
            contact_id: "c1".into(),
            sequence_id: "seq1".into(),
            current_step_order: 0,
            next_fire_time: next_fire.map(String::from),
            status: EnrollmentStatus::Active,
            status_reason: None,
            custom_variables: Default::default(),
            contact_replied: false,
            answered_call: false,
            appointment_booked: false,
            needs_human_intervention: false,
            emotional_state: Default::default(),
            channel_overrides: Default::default(),
            failure_history: Default::default(),
            selected_variants: Default::default(),
            total_attempts: 0,
            enrolled_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn due_batch_orders_by_fire_time_and_respects_limit() {
        let store = test_store();
        for (i, t) in ["2025-01-01T00:00:03+00:00", "2025-01-01T00:00:01+00:00", "2025-01-01T00:00:02+00:00"]
            .iter()
            .enumerate()
        {
            let mut e = sample_enrollment(Some(t));
            e.id = EnrollmentId(format!("e{i}"));
            store.create_enrollment(&e).unwrap();
        }

        let due = store.due_enrollments("2025-01-01T00:00:10+00:00", 2).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id.as_str(), "e1");
        assert_eq!(due[1].id.as_str(), "e2");
    }

    #[test]
    fn due_batch_excludes_future_and_terminal() {
        let store = test_store();
        let mut future = sample_enrollment(Some("2025-06-01T00:00:00+00:00"));
        future.id = EnrollmentId("future".into());
        store.create_enrollment(&future).unwrap();

        let mut done = sample_enrollment(None);
        done.id = EnrollmentId("done".into());
        done.status = EnrollmentStatus::Completed;
        store.create_enrollment(&done).unwrap();

        let due = store.due_enrollments("2025-01-01T00:00:00+00:00", 10).unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn advancement_never_decreases_step_order() {
        let store = test_store();
        let e = sample_enrollment(Some("2025-01-01T00:00:00+00:00"));
        let id = e.id.as_str().to_string();
        store.create_enrollment(&e).unwrap();

        assert!(store
            .advance_after_dispatch(&id, 1, Some("2025-01-01T01:00:00+00:00"))
            .unwrap());
        // A stale writer trying to move back to 1 (or to 0) is a no-op.
        assert!(!store.advance_after_dispatch(&id, 1, None).unwrap());
        assert!(!store.advance_skipped(&id, 0, None).unwrap());

        let got = store.enrollment(&id).unwrap().unwrap();
        assert_eq!(got.current_step_order, 1);
        assert_eq!(got.total_attempts, 1);
    }

    #[test]
    fn booked_is_terminal_and_idempotent() {
        let store = test_store();
        let e = sample_enrollment(Some("2025-01-01T00:00:00+00:00"));
        let id = e.id.as_str().to_string();
        store.create_enrollment(&e).unwrap();

        store.mark_booked(&id).unwrap();
        store.mark_booked(&id).unwrap();

        let got = store.enrollment(&id).unwrap().unwrap();
        assert_eq!(got.status, EnrollmentStatus::Booked);
        assert!(got.appointment_booked);
        assert!(got.next_fire_time.is_none());
    }

    #[test]
    fn channel_override_round_trips() {
        let store = test_store();
        let e = sample_enrollment(Some("2025-01-01T00:00:00+00:00"));
        let id = e.id.as_str().to_string();
        store.create_enrollment(&e).unwrap();

        store
            .set_channel_override(&id, Channel::Voice, Channel::Sms)
            .unwrap();
        let got = store.enrollment(&id).unwrap().unwrap();
        assert_eq!(got.channel_overrides.get(&Channel::Voice), Some(&Channel::Sms));
    }

    #[test]
    fn replied_with_stop_leaves_active_pool() {
        let store = test_store();
        let e = sample_enrollment(Some("2025-01-01T00:00:00+00:00"));
        let id = e.id.as_str().to_string();
        store.create_enrollment(&e).unwrap();

        store.mark_replied(&id, true).unwrap();
        let got = store.enrollment(&id).unwrap().unwrap();
        assert_eq!(got.status, EnrollmentStatus::Replied);
        assert!(got.contact_replied);

        let due = store.due_enrollments("2025-06-01T00:00:00+00:00", 10).unwrap();
        assert!(due.is_empty());
    }
}
