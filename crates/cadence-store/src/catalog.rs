//! Read side of the CRM-ish catalog the core consumes: tenants, contacts,
//! sequences, steps, variants, umbrella rows, and tenant → umbrella
//! assignments. The core only writes the handful of columns it owns
//! (engagement, landline flag, variant counters, umbrella sync stamps).

use rusqlite::params;

use cadence_core::analysis::SentimentTrend;
use cadence_core::clock::{BusinessHours, DayWindow};
use cadence_core::types::{Channel, StepMutationOverride, TenantId, UmbrellaId};

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{
    Contact, Sequence, SequenceStep, StepVariant, TenantProfile, Umbrella, UmbrellaAssignment,
};

impl Store {
    /// Insert a tenant profile (admin/import surface and tests).
    pub fn create_tenant(&self, t: &TenantProfile) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tenant_profiles
             (id, display_name, timezone, weekday_open, weekday_close,
              weekend_open, weekend_close, always_open, brand_voice,
              custom_phrases, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?11)",
            params![
                t.id.as_str(),
                t.display_name,
                t.timezone,
                t.business_hours.weekday.open_hour,
                t.business_hours.weekday.close_hour,
                t.business_hours.weekend.open_hour,
                t.business_hours.weekend.close_hour,
                t.business_hours.always_open,
                t.brand_voice,
                serde_json::to_string(&t.custom_phrases)?,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    pub fn create_contact(&self, c: &Contact) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO contacts
             (id, tenant_id, display_name, phone, email, company, custom_fields,
              landline, engagement_score, sentiment_trend, conversation_summary,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?12)",
            params![
                c.id.as_str(),
                c.tenant_id.as_str(),
                c.display_name,
                c.phone,
                c.email,
                c.company,
                serde_json::to_string(&c.custom_fields)?,
                c.landline,
                c.engagement_score,
                c.sentiment_trend.to_string(),
                c.conversation_summary,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    pub fn create_sequence(&self, s: &Sequence) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sequences
             (id, tenant_id, name, urgency, respect_business_hours, stop_on_reply,
              mutation_enabled, mutation_aggressiveness, timeout_hours, active,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?11)",
            params![
                s.id,
                s.tenant_id.as_str(),
                s.name,
                s.urgency.to_string(),
                s.respect_business_hours,
                s.stop_on_reply,
                s.mutation_enabled,
                s.mutation_aggressiveness.to_string(),
                s.timeout_hours,
                s.active,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    pub fn create_step(&self, st: &SequenceStep) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sequence_steps
             (id, sequence_id, step_order, channel, delay_seconds, content,
              skip_conditions, on_success, on_failure, mutation_override,
              mutation_instructions, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                st.id,
                st.sequence_id,
                st.step_order,
                st.channel.to_string(),
                st.delay_seconds,
                serde_json::to_string(&st.content)?,
                serde_json::to_string(&st.skip_conditions)?,
                st.on_success,
                st.on_failure,
                st.mutation_override.to_string(),
                st.mutation_instructions,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    pub fn create_variant(&self, v: &StepVariant) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO step_variants
             (id, step_id, label, content, weight, active,
              sent_count, reply_count, conversion_count, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                v.id,
                v.step_id,
                v.label,
                serde_json::to_string(&v.content)?,
                v.weight,
                v.active,
                v.sent_count,
                v.reply_count,
                v.conversion_count,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    pub fn create_umbrella(&self, u: &Umbrella) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO umbrellas
             (id, name, provider_org_id, provider_api_key, concurrency_limit,
              last_reported_current, last_sync_at, active, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?9)",
            params![
                u.id.as_str(),
                u.name,
                u.provider_org_id,
                u.provider_api_key,
                u.concurrency_limit,
                u.last_reported_current,
                u.last_sync_at,
                u.active,
                Self::now(),
            ],
        )?;
        Ok(())
    }

    pub fn create_assignment(
        &self,
        tenant_id: &str,
        umbrella_id: &str,
        tenant_cap: u32,
        priority_weight: f64,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR REPLACE INTO tenant_umbrella_assignments
             (tenant_id, umbrella_id, tenant_cap, priority_weight, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![tenant_id, umbrella_id, tenant_cap, priority_weight, Self::now()],
        )?;
        Ok(())
    }

    /// Drop a tenant's assignment (reassignment flow; the caller also
    /// invalidates the resolver cache and cleans the UCM tenant entry).
    pub fn remove_assignment(&self, tenant_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM tenant_umbrella_assignments WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        Ok(())
    }

    pub fn tenant(&self, id: &str) -> Result<Option<TenantProfile>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, display_name, timezone, weekday_open, weekday_close,
                    weekend_open, weekend_close, always_open, brand_voice, custom_phrases
             FROM tenant_profiles WHERE id = ?1",
            params![id],
            row_to_tenant,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn contact(&self, id: &str) -> Result<Option<Contact>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
            params![id],
            row_to_contact,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Inbound-call lookup: match a caller's number against the contacts of
    /// the tenants assigned to one umbrella. Most-recently-updated wins when
    /// several tenants know the number.
    pub fn contact_by_phone_for_umbrella(
        &self,
        phone: &str,
        umbrella_id: &str,
    ) -> Result<Option<Contact>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE phone = ?1 AND tenant_id IN (
                     SELECT tenant_id FROM tenant_umbrella_assignments WHERE umbrella_id = ?2)
                 ORDER BY updated_at DESC
                 LIMIT 1"
            ),
            params![phone, umbrella_id],
            row_to_contact,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Engagement score + trend, written back after each analysis.
    pub fn update_contact_engagement(
        &self,
        id: &str,
        score: i64,
        trend: SentimentTrend,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE contacts
             SET engagement_score = ?1, sentiment_trend = ?2, updated_at = ?3
             WHERE id = ?4",
            params![score, trend.to_string(), Self::now(), id],
        )?;
        Ok(())
    }

    pub fn set_contact_landline(&self, id: &str, landline: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE contacts SET landline = ?1, updated_at = ?2 WHERE id = ?3",
            params![landline, Self::now(), id],
        )?;
        Ok(())
    }

    pub fn update_conversation_summary(&self, id: &str, summary: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE contacts SET conversation_summary = ?1, updated_at = ?2 WHERE id = ?3",
            params![summary, Self::now(), id],
        )?;
        Ok(())
    }

    pub fn sequence(&self, id: &str) -> Result<Option<Sequence>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, tenant_id, name, urgency, respect_business_hours, stop_on_reply,
                    mutation_enabled, mutation_aggressiveness, timeout_hours, active
             FROM sequences WHERE id = ?1",
            params![id],
            row_to_sequence,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// The step at a given 1-based order, or `None` past the end.
    pub fn step(&self, sequence_id: &str, step_order: u32) -> Result<Option<SequenceStep>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {STEP_COLUMNS} FROM sequence_steps
                 WHERE sequence_id = ?1 AND step_order = ?2"
            ),
            params![sequence_id, step_order],
            row_to_step,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Active A/B variants for a step, stable id order (the tie-break order
    /// for the weighted draw).
    pub fn variants_for_step(&self, step_id: &str) -> Result<Vec<StepVariant>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "SELECT id, step_id, label, content, weight, active,
                    sent_count, reply_count, conversion_count
             FROM step_variants
             WHERE step_id = ?1 AND active = 1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![step_id], row_to_variant)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn record_variant_sent(&self, variant_id: &str) -> Result<()> {
        self.bump_variant_counter(variant_id, "sent_count")
    }

    pub fn record_variant_reply(&self, variant_id: &str) -> Result<()> {
        self.bump_variant_counter(variant_id, "reply_count")
    }

    pub fn record_variant_conversion(&self, variant_id: &str) -> Result<()> {
        self.bump_variant_counter(variant_id, "conversion_count")
    }

    fn bump_variant_counter(&self, variant_id: &str, column: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            &format!("UPDATE step_variants SET {column} = {column} + 1 WHERE id = ?1"),
            params![variant_id],
        )?;
        Ok(())
    }

    pub fn umbrella(&self, id: &str) -> Result<Option<Umbrella>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {UMBRELLA_COLUMNS} FROM umbrellas WHERE id = ?1"),
            params![id],
            row_to_umbrella,
        ) {
            Ok(u) => Ok(Some(u)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Concurrency-sync webhooks identify the account by provider org id.
    pub fn umbrella_by_org(&self, provider_org_id: &str) -> Result<Option<Umbrella>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {UMBRELLA_COLUMNS} FROM umbrellas
                 WHERE provider_org_id = ?1 AND active = 1"
            ),
            params![provider_org_id],
            row_to_umbrella,
        ) {
            Ok(u) => Ok(Some(u)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// The resolver's source of truth: assignment joined with umbrella limits.
    pub fn assignment_for_tenant(&self, tenant_id: &str) -> Result<Option<UmbrellaAssignment>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT a.tenant_id, a.umbrella_id, u.provider_api_key,
                    u.concurrency_limit, a.tenant_cap, a.priority_weight
             FROM tenant_umbrella_assignments a
             JOIN umbrellas u ON u.id = a.umbrella_id
             WHERE a.tenant_id = ?1 AND u.active = 1",
            params![tenant_id],
            |row| {
                Ok(UmbrellaAssignment {
                    tenant_id: TenantId(row.get(0)?),
                    umbrella_id: UmbrellaId(row.get(1)?),
                    provider_api_key: row.get(2)?,
                    concurrency_limit: row.get(3)?,
                    tenant_cap: row.get(4)?,
                    priority_weight: row.get(5)?,
                })
            },
        ) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Stamp the provider-reported concurrency onto the umbrella row.
    pub fn record_umbrella_sync(&self, id: &str, current: u32, limit: u32) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE umbrellas
             SET last_reported_current = ?1, concurrency_limit = ?2,
                 last_sync_at = ?3, updated_at = ?3
             WHERE id = ?4",
            params![current, limit, Self::now(), id],
        )?;
        Ok(())
    }
}

const CONTACT_COLUMNS: &str = "id, tenant_id, display_name, phone, email, company,
    custom_fields, landline, engagement_score, sentiment_trend, conversation_summary";

const STEP_COLUMNS: &str = "id, sequence_id, step_order, channel, delay_seconds, content,
    skip_conditions, on_success, on_failure, mutation_override, mutation_instructions";

const UMBRELLA_COLUMNS: &str = "id, name, provider_org_id, provider_api_key,
    concurrency_limit, last_reported_current, last_sync_at, active";

fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<TenantProfile> {
    let phrases: String = row.get(9)?;
    Ok(TenantProfile {
        id: TenantId(row.get(0)?),
        display_name: row.get(1)?,
        timezone: row.get(2)?,
        business_hours: BusinessHours {
            weekday: DayWindow {
                open_hour: row.get(3)?,
                close_hour: row.get(4)?,
            },
            weekend: DayWindow {
                open_hour: row.get(5)?,
                close_hour: row.get(6)?,
            },
            always_open: row.get(7)?,
        },
        brand_voice: row.get(8)?,
        custom_phrases: serde_json::from_str(&phrases).unwrap_or_default(),
    })
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let fields: String = row.get(6)?;
    let trend: String = row.get(9)?;
    Ok(Contact {
        id: cadence_core::types::ContactId(row.get(0)?),
        tenant_id: TenantId(row.get(1)?),
        display_name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        company: row.get(5)?,
        custom_fields: serde_json::from_str(&fields).unwrap_or_default(),
        landline: row.get(7)?,
        engagement_score: row.get(8)?,
        sentiment_trend: trend.parse().unwrap_or_default(),
        conversation_summary: row.get(10)?,
    })
}

fn row_to_sequence(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sequence> {
    let urgency: String = row.get(3)?;
    let aggressiveness: String = row.get(7)?;
    Ok(Sequence {
        id: row.get(0)?,
        tenant_id: TenantId(row.get(1)?),
        name: row.get(2)?,
        urgency: urgency.parse().unwrap_or_default(),
        respect_business_hours: row.get(4)?,
        stop_on_reply: row.get(5)?,
        mutation_enabled: row.get(6)?,
        mutation_aggressiveness: aggressiveness.parse().unwrap_or_default(),
        timeout_hours: row.get(8)?,
        active: row.get(9)?,
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<SequenceStep> {
    let channel: String = row.get(3)?;
    let content: String = row.get(5)?;
    let skip: String = row.get(6)?;
    let override_str: String = row.get(9)?;
    Ok(SequenceStep {
        id: row.get(0)?,
        sequence_id: row.get(1)?,
        step_order: row.get(2)?,
        channel: channel.parse().unwrap_or(Channel::Sms),
        delay_seconds: row.get(4)?,
        content: serde_json::from_str(&content).unwrap_or(cadence_core::types::StepContent::Sms {
            body: String::new(),
        }),
        skip_conditions: serde_json::from_str(&skip).unwrap_or_default(),
        on_success: row.get(7)?,
        on_failure: row.get(8)?,
        mutation_override: override_str.parse().unwrap_or(StepMutationOverride::Default),
        mutation_instructions: row.get(10)?,
    })
}

fn row_to_variant(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepVariant> {
    let content: String = row.get(3)?;
    Ok(StepVariant {
        id: row.get(0)?,
        step_id: row.get(1)?,
        label: row.get(2)?,
        content: serde_json::from_str(&content).unwrap_or(cadence_core::types::StepContent::Sms {
            body: String::new(),
        }),
        weight: row.get(4)?,
        active: row.get(5)?,
        sent_count: row.get(6)?,
        reply_count: row.get(7)?,
        conversion_count: row.get(8)?,
    })
}

fn row_to_umbrella(row: &rusqlite::Row<'_>) -> rusqlite::Result<Umbrella> {
    Ok(Umbrella {
        id: UmbrellaId(row.get(0)?),
        name: row.get(1)?,
        provider_org_id: row.get(2)?,
        provider_api_key: row.get(3)?,
        concurrency_limit: row.get(4)?,
        last_reported_current: row.get(5)?,
        last_sync_at: row.get(6)?,
        active: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        Store::from_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap()
    }

    fn seed_minimal(store: &Store) {
        store
            .create_tenant(&TenantProfile {
                id: "t1".into(),
                display_name: "Acme Roofing".into(),
                timezone: "America/Los_Angeles".into(),
                business_hours: BusinessHours::default(),
                brand_voice: None,
                custom_phrases: vec![],
            })
            .unwrap();
        store
            .create_contact(&Contact {
                id: "c1".into(),
                tenant_id: "t1".into(),
                display_name: "Dana Smith".into(),
                phone: Some("+15551234567".into()),
                email: Some("dana@example.com".into()),
                company: None,
                custom_fields: Default::default(),
                landline: false,
                engagement_score: 50,
                sentiment_trend: Default::default(),
                conversation_summary: None,
            })
            .unwrap();
        store
            .create_sequence(&Sequence {
                id: "seq1".into(),
                tenant_id: "t1".into(),
                name: "post-quote follow-up".into(),
                urgency: "high".parse().unwrap(),
                respect_business_hours: true,
                stop_on_reply: true,
                mutation_enabled: false,
                mutation_aggressiveness: Default::default(),
                timeout_hours: None,
                active: true,
            })
            .unwrap();
        store
            .create_step(&SequenceStep {
                id: "st1".into(),
                sequence_id: "seq1".into(),
                step_order: 1,
                channel: Channel::Sms,
                delay_seconds: 0,
                content: cadence_core::types::StepContent::Sms {
                    body: "hi {{first_name}}".into(),
                },
                skip_conditions: vec![],
                on_success: None,
                on_failure: None,
                mutation_override: Default::default(),
                mutation_instructions: None,
            })
            .unwrap();
        store
            .create_umbrella(&Umbrella {
                id: "u1".into(),
                name: "shared-voice-1".into(),
                provider_org_id: Some("org-123".into()),
                provider_api_key: "key".into(),
                concurrency_limit: 8,
                last_reported_current: None,
                last_sync_at: None,
                active: true,
            })
            .unwrap();
        store.create_assignment("t1", "u1", 3, 1.0).unwrap();
    }

    #[test]
    fn tenant_business_hours_round_trip() {
        let store = test_store();
        seed_minimal(&store);
        let t = store.tenant("t1").unwrap().unwrap();
        assert_eq!(t.timezone, "America/Los_Angeles");
        assert_eq!(t.business_hours.weekday.open_hour, 9);
        assert!(!t.business_hours.always_open);
    }

    #[test]
    fn step_lookup_past_end_is_none() {
        let store = test_store();
        seed_minimal(&store);
        assert!(store.step("seq1", 1).unwrap().is_some());
        assert!(store.step("seq1", 2).unwrap().is_none());
    }

    #[test]
    fn assignment_joins_umbrella_limits() {
        let store = test_store();
        seed_minimal(&store);
        let a = store.assignment_for_tenant("t1").unwrap().unwrap();
        assert_eq!(a.umbrella_id.as_str(), "u1");
        assert_eq!(a.concurrency_limit, 8);
        assert_eq!(a.tenant_cap, 3);
    }

    #[test]
    fn umbrella_org_lookup() {
        let store = test_store();
        seed_minimal(&store);
        assert!(store.umbrella_by_org("org-123").unwrap().is_some());
        assert!(store.umbrella_by_org("org-unknown").unwrap().is_none());
    }

    #[test]
    fn contact_lookup_scoped_to_umbrella_tenants() {
        let store = test_store();
        seed_minimal(&store);
        let c = store
            .contact_by_phone_for_umbrella("+15551234567", "u1")
            .unwrap()
            .unwrap();
        assert_eq!(c.id.as_str(), "c1");
        assert!(store
            .contact_by_phone_for_umbrella("+15550000000", "u1")
            .unwrap()
            .is_none());
    }
}
