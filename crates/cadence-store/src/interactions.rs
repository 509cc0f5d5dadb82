//! Append-only interaction log plus the one sanctioned in-place update:
//! an outbound call's row is enriched when its outcome webhook arrives,
//! rather than duplicated.

use rusqlite::params;
use uuid::Uuid;

use cadence_core::types::{Channel, ContactId, Direction, EnrollmentId, TenantId};

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{Interaction, InteractionCounts, NewInteraction};

const INTERACTION_COLUMNS: &str = "id, tenant_id, contact_id, enrollment_id, channel, direction,
    content, outcome, sentiment, intent, call_duration_secs, call_disposition,
    objections, key_topics, provider_id, event_type, analysis, created_at";

impl Store {
    /// Append an interaction. Returns `false` (without writing) when a row
    /// with the same `(provider_id, event_type)` already exists — the
    /// webhook-replay idempotence contract.
    pub fn record_interaction(&self, new: &NewInteraction) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let id = Uuid::now_v7().to_string();
        let n = db.execute(
            "INSERT OR IGNORE INTO interactions
             (id, tenant_id, contact_id, enrollment_id, channel, direction, content,
              outcome, sentiment, intent, call_duration_secs, call_disposition,
              objections, key_topics, provider_id, event_type, analysis, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                id,
                new.tenant_id,
                new.contact_id,
                new.enrollment_id,
                new.channel,
                new.direction,
                new.content,
                new.outcome,
                new.sentiment,
                new.intent,
                new.call_duration_secs,
                new.call_disposition,
                new.objections,
                new.key_topics,
                new.provider_id,
                new.event_type,
                new.analysis,
                Self::now(),
            ],
        )?;
        Ok(n > 0)
    }

    /// Find the outbound interaction written at call initiation.
    pub fn interaction_by_provider_id(&self, provider_id: &str) -> Result<Option<Interaction>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {INTERACTION_COLUMNS} FROM interactions
                 WHERE provider_id = ?1
                 ORDER BY created_at ASC
                 LIMIT 1"
            ),
            params![provider_id],
            row_to_interaction,
        ) {
            Ok(i) => Ok(Some(i)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Enrich the outbound call interaction with its final outcome.
    pub fn update_call_outcome(
        &self,
        provider_call_id: &str,
        outcome: &str,
        duration_secs: Option<i64>,
        disposition: Option<&str>,
        transcript: Option<&str>,
        analysis_json: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE interactions
             SET outcome = ?1,
                 call_duration_secs = COALESCE(?2, call_duration_secs),
                 call_disposition = COALESCE(?3, call_disposition),
                 content = CASE WHEN ?4 IS NOT NULL AND ?4 != '' THEN ?4 ELSE content END,
                 analysis = COALESCE(?5, analysis)
             WHERE provider_id = ?6 AND direction = 'outbound' AND channel = 'voice'",
            params![
                outcome,
                duration_secs,
                disposition,
                transcript,
                analysis_json,
                provider_call_id
            ],
        )?;
        Ok(())
    }

    /// Update the delivery outcome on an outbound interaction (delivery
    /// reports, bounces).
    pub fn update_interaction_outcome(&self, provider_id: &str, outcome: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE interactions SET outcome = ?1
             WHERE provider_id = ?2 AND direction = 'outbound'",
            params![outcome, provider_id],
        )?;
        Ok(())
    }

    /// Attach the analysis verdict to an already-recorded inbound row.
    pub fn update_interaction_analysis(
        &self,
        provider_id: &str,
        event_type: &str,
        sentiment: &str,
        intent: &str,
        objections_json: &str,
        key_topics_json: &str,
        analysis_json: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE interactions
             SET sentiment = ?1, intent = ?2, objections = ?3, key_topics = ?4, analysis = ?5
             WHERE provider_id = ?6 AND event_type = ?7",
            params![
                sentiment,
                intent,
                objections_json,
                key_topics_json,
                analysis_json,
                provider_id,
                event_type
            ],
        )?;
        Ok(())
    }

    /// Most recent interactions for an enrollment, oldest first.
    pub fn recent_interactions(&self, enrollment_id: &str, limit: usize) -> Result<Vec<Interaction>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions
             WHERE enrollment_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![enrollment_id, limit as i64], row_to_interaction)?;
        let mut out: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        out.reverse();
        Ok(out)
    }

    /// Same, but across every enrollment of the contact (timeline assembly).
    pub fn recent_contact_interactions(
        &self,
        contact_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM interactions
             WHERE contact_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![contact_id, limit as i64], row_to_interaction)?;
        let mut out: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        out.reverse();
        Ok(out)
    }

    pub fn interaction_counts(&self, enrollment_id: &str) -> Result<InteractionCounts> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT COUNT(*),
                    SUM(channel = 'voice'),
                    SUM(channel = 'sms'),
                    SUM(channel = 'email'),
                    SUM(direction = 'inbound'),
                    SUM(direction = 'outbound')
             FROM interactions WHERE enrollment_id = ?1",
            params![enrollment_id],
            |row| {
                Ok(InteractionCounts {
                    total: row.get::<_, i64>(0)? as u64,
                    calls: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                    sms: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                    emails: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
                    inbound: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
                    outbound: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u64,
                })
            },
        )
        .map_err(StoreError::Database)
    }

    /// First touch for a contact, RFC 3339, if any.
    pub fn first_interaction_at(&self, contact_id: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT MIN(created_at) FROM interactions WHERE contact_id = ?1",
            params![contact_id],
            |row| row.get::<_, Option<String>>(0),
        ) {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

fn row_to_interaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Interaction> {
    let channel: String = row.get(4)?;
    let direction: String = row.get(5)?;
    let objections: Option<String> = row.get(12)?;
    let key_topics: Option<String> = row.get(13)?;
    let analysis: Option<String> = row.get(16)?;
    Ok(Interaction {
        id: row.get(0)?,
        tenant_id: TenantId(row.get(1)?),
        contact_id: ContactId(row.get(2)?),
        enrollment_id: row.get::<_, Option<String>>(3)?.map(EnrollmentId),
        channel: channel.parse().unwrap_or(Channel::Sms),
        direction: direction.parse().unwrap_or(Direction::Outbound),
        content: row.get(6)?,
        outcome: row.get(7)?,
        sentiment: row.get(8)?,
        intent: row.get(9)?,
        call_duration_secs: row.get(10)?,
        call_disposition: row.get(11)?,
        objections: objections
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        key_topics: key_topics
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        provider_id: row.get(14)?,
        event_type: row.get(15)?,
        analysis: analysis.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        Store::from_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap()
    }

    fn inbound_sms(provider_id: &str) -> NewInteraction {
        NewInteraction {
            tenant_id: "t1".into(),
            contact_id: "c1".into(),
            enrollment_id: Some("e1".into()),
            channel: "sms".into(),
            direction: "inbound".into(),
            content: "sounds good, what would it cost?".into(),
            provider_id: Some(provider_id.into()),
            event_type: Some("sms-reply".into()),
            ..Default::default()
        }
    }

    #[test]
    fn replayed_event_is_a_noop() {
        let store = test_store();
        assert!(store.record_interaction(&inbound_sms("msg-1")).unwrap());
        assert!(!store.record_interaction(&inbound_sms("msg-1")).unwrap());

        let counts = store.interaction_counts("e1").unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.inbound, 1);
    }

    #[test]
    fn same_provider_id_different_event_type_inserts() {
        let store = test_store();
        assert!(store.record_interaction(&inbound_sms("msg-1")).unwrap());
        let mut delivery = inbound_sms("msg-1");
        delivery.event_type = Some("sms-delivery".into());
        assert!(store.record_interaction(&delivery).unwrap());
    }

    #[test]
    fn call_outcome_updates_in_place() {
        let store = test_store();
        let call = NewInteraction {
            tenant_id: "t1".into(),
            contact_id: "c1".into(),
            enrollment_id: Some("e1".into()),
            channel: "voice".into(),
            direction: "outbound".into(),
            content: String::new(),
            outcome: Some("delivered".into()),
            provider_id: Some("call-9".into()),
            event_type: Some("call-initiated".into()),
            ..Default::default()
        };
        store.record_interaction(&call).unwrap();

        store
            .update_call_outcome("call-9", "answered", Some(145), Some("interested"), Some("... transcript ..."), None)
            .unwrap();

        let got = store.interaction_by_provider_id("call-9").unwrap().unwrap();
        assert_eq!(got.outcome.as_deref(), Some("answered"));
        assert_eq!(got.call_duration_secs, Some(145));
        assert_eq!(got.content, "... transcript ...");

        // Still one row: updated, not duplicated.
        assert_eq!(store.interaction_counts("e1").unwrap().total, 1);
    }

    #[test]
    fn recent_interactions_return_oldest_first() {
        let store = test_store();
        for i in 0..3 {
            let mut n = inbound_sms(&format!("m{i}"));
            n.content = format!("message {i}");
            store.record_interaction(&n).unwrap();
        }
        let got = store.recent_interactions("e1", 10).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].content, "message 0");
        assert_eq!(got[2].content, "message 2");
    }
}
