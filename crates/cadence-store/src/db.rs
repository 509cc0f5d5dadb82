use rusqlite::{Connection, Result};

/// Initialise the full schema. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_tenant_tables(conn)?;
    create_catalog_tables(conn)?;
    create_enrollment_table(conn)?;
    create_interaction_table(conn)?;
    create_audit_tables(conn)?;
    create_umbrella_tables(conn)?;
    Ok(())
}

fn create_tenant_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenant_profiles (
            id             TEXT    NOT NULL PRIMARY KEY,
            display_name   TEXT    NOT NULL,
            timezone       TEXT    NOT NULL DEFAULT 'UTC',
            weekday_open   INTEGER NOT NULL DEFAULT 9,
            weekday_close  INTEGER NOT NULL DEFAULT 18,
            weekend_open   INTEGER NOT NULL DEFAULT 10,
            weekend_close  INTEGER NOT NULL DEFAULT 16,
            always_open    INTEGER NOT NULL DEFAULT 0,
            brand_voice    TEXT,
            custom_phrases TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS contacts (
            id                   TEXT    NOT NULL PRIMARY KEY,
            tenant_id            TEXT    NOT NULL,
            display_name         TEXT    NOT NULL DEFAULT '',
            phone                TEXT,
            email                TEXT,
            company              TEXT,
            custom_fields        TEXT    NOT NULL DEFAULT '{}',  -- JSON object
            landline             INTEGER NOT NULL DEFAULT 0,
            engagement_score     INTEGER NOT NULL DEFAULT 50,
            sentiment_trend      TEXT    NOT NULL DEFAULT 'stable',
            conversation_summary TEXT,
            created_at           TEXT    NOT NULL,
            updated_at           TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_contacts_tenant ON contacts (tenant_id);
        CREATE INDEX IF NOT EXISTS idx_contacts_phone  ON contacts (phone);",
    )
}

fn create_catalog_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sequences (
            id                     TEXT    NOT NULL PRIMARY KEY,
            tenant_id              TEXT    NOT NULL,
            name                   TEXT    NOT NULL,
            urgency                TEXT    NOT NULL DEFAULT 'medium',
            respect_business_hours INTEGER NOT NULL DEFAULT 1,
            stop_on_reply          INTEGER NOT NULL DEFAULT 1,
            mutation_enabled       INTEGER NOT NULL DEFAULT 0,
            mutation_aggressiveness TEXT   NOT NULL DEFAULT 'conservative',
            trigger_conditions     TEXT    NOT NULL DEFAULT '[]',  -- JSON, advisory
            timeout_hours          INTEGER,                        -- NULL = no timeout
            active                 INTEGER NOT NULL DEFAULT 1,
            created_at             TEXT    NOT NULL,
            updated_at             TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_sequences_tenant ON sequences (tenant_id);

        CREATE TABLE IF NOT EXISTS sequence_steps (
            id                    TEXT    NOT NULL PRIMARY KEY,
            sequence_id           TEXT    NOT NULL,
            step_order            INTEGER NOT NULL,              -- 1-based
            channel               TEXT    NOT NULL,
            delay_seconds         INTEGER NOT NULL DEFAULT 0,
            content               TEXT    NOT NULL,              -- JSON StepContent
            skip_conditions       TEXT    NOT NULL DEFAULT '[]', -- JSON array of keys
            only_if               TEXT,                          -- JSON, advisory
            on_success            TEXT,
            on_failure            TEXT,
            mutation_override     TEXT    NOT NULL DEFAULT 'default',
            mutation_instructions TEXT,
            created_at            TEXT    NOT NULL,
            UNIQUE (sequence_id, step_order)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_steps_sequence
            ON sequence_steps (sequence_id, step_order);

        CREATE TABLE IF NOT EXISTS step_variants (
            id               TEXT    NOT NULL PRIMARY KEY,
            step_id          TEXT    NOT NULL,
            label            TEXT    NOT NULL DEFAULT '',
            content          TEXT    NOT NULL,            -- JSON StepContent
            weight           REAL    NOT NULL DEFAULT 0,
            active           INTEGER NOT NULL DEFAULT 1,
            sent_count       INTEGER NOT NULL DEFAULT 0,
            reply_count      INTEGER NOT NULL DEFAULT 0,
            conversion_count INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_variants_step ON step_variants (step_id);",
    )
}

fn create_enrollment_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS enrollments (
            id                       TEXT    NOT NULL PRIMARY KEY,
            tenant_id                TEXT    NOT NULL,
            contact_id               TEXT    NOT NULL,
            sequence_id              TEXT    NOT NULL,
            current_step_order       INTEGER NOT NULL DEFAULT 0,  -- 0 = step 1 unsent
            next_fire_time           TEXT,                        -- NULL iff terminal
            status                   TEXT    NOT NULL DEFAULT 'active',
            status_reason            TEXT,
            custom_variables         TEXT    NOT NULL DEFAULT '{}',
            contact_replied          INTEGER NOT NULL DEFAULT 0,
            answered_call            INTEGER NOT NULL DEFAULT 0,
            appointment_booked       INTEGER NOT NULL DEFAULT 0,
            needs_human_intervention INTEGER NOT NULL DEFAULT 0,
            emotional_state          TEXT    NOT NULL DEFAULT '{}',  -- JSON EmotionalState
            channel_overrides        TEXT    NOT NULL DEFAULT '{}',  -- JSON {from: to}
            failure_history          TEXT    NOT NULL DEFAULT '[]',  -- JSON [FailureRecord]
            selected_variants        TEXT    NOT NULL DEFAULT '{}',  -- JSON {step_order: variant_id}
            total_attempts           INTEGER NOT NULL DEFAULT 0,
            enrolled_at              TEXT    NOT NULL,
            updated_at               TEXT    NOT NULL
        ) STRICT;

        -- The scheduler's due-batch query: active rows by ascending fire time.
        CREATE INDEX IF NOT EXISTS idx_enrollments_due
            ON enrollments (status, next_fire_time);
        CREATE INDEX IF NOT EXISTS idx_enrollments_contact
            ON enrollments (contact_id);",
    )
}

fn create_interaction_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS interactions (
            id                 TEXT    NOT NULL PRIMARY KEY,
            tenant_id          TEXT    NOT NULL,
            contact_id         TEXT    NOT NULL,
            enrollment_id      TEXT,
            channel            TEXT    NOT NULL,
            direction          TEXT    NOT NULL,
            content            TEXT    NOT NULL DEFAULT '',
            outcome            TEXT,
            sentiment          TEXT,
            intent             TEXT,
            call_duration_secs INTEGER,
            call_disposition   TEXT,
            objections         TEXT,               -- JSON array
            key_topics         TEXT,               -- JSON array
            provider_id        TEXT,
            event_type         TEXT,
            analysis           TEXT,               -- JSON EmotionalAnalysis
            created_at         TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_interactions_enrollment
            ON interactions (enrollment_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_interactions_contact
            ON interactions (contact_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_interactions_provider
            ON interactions (provider_id);

        -- Webhook replay idempotence: one row per (provider event, type).
        CREATE UNIQUE INDEX IF NOT EXISTS idx_interactions_dedupe
            ON interactions (provider_id, event_type)
            WHERE provider_id IS NOT NULL AND event_type IS NOT NULL;",
    )
}

fn create_audit_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS mutations (
            id                     TEXT    NOT NULL PRIMARY KEY,
            enrollment_id          TEXT    NOT NULL,
            step_id                TEXT    NOT NULL,
            step_order             INTEGER NOT NULL,
            channel                TEXT    NOT NULL,
            original               TEXT    NOT NULL,  -- JSON StepContent
            rewritten              TEXT    NOT NULL,  -- JSON StepContent
            confidence             REAL    NOT NULL,
            aggressiveness         TEXT    NOT NULL,
            model                  TEXT    NOT NULL,
            resulted_in_reply      INTEGER NOT NULL DEFAULT 0,
            resulted_in_conversion INTEGER NOT NULL DEFAULT 0,
            created_at             TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_mutations_enrollment
            ON mutations (enrollment_id, created_at);

        CREATE TABLE IF NOT EXISTS execution_log (
            id               TEXT    NOT NULL PRIMARY KEY,
            tenant_id        TEXT    NOT NULL,
            enrollment_id    TEXT,
            step_order       INTEGER,
            action           TEXT    NOT NULL,
            status           TEXT    NOT NULL,
            provider_call_id TEXT,
            detail           TEXT,
            created_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_execution_enrollment
            ON execution_log (enrollment_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_execution_call
            ON execution_log (provider_call_id);

        -- Exactly-once slot release per provider call id.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_execution_release_once
            ON execution_log (provider_call_id, action)
            WHERE provider_call_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS healing_log (
            id            TEXT    NOT NULL PRIMARY KEY,
            enrollment_id TEXT    NOT NULL,
            step_order    INTEGER NOT NULL,
            failure_type  TEXT    NOT NULL,
            action        TEXT    NOT NULL,
            detail        TEXT    NOT NULL DEFAULT '',
            created_at    TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_healing_enrollment
            ON healing_log (enrollment_id, created_at);

        CREATE TABLE IF NOT EXISTS notifications (
            id            TEXT    NOT NULL PRIMARY KEY,
            tenant_id     TEXT    NOT NULL,
            enrollment_id TEXT,
            contact_id    TEXT,
            kind          TEXT    NOT NULL,
            severity      TEXT,
            payload       TEXT    NOT NULL DEFAULT '{}',
            read          INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_notifications_tenant
            ON notifications (tenant_id, read, created_at);",
    )
}

fn create_umbrella_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS umbrellas (
            id                    TEXT    NOT NULL PRIMARY KEY,
            name                  TEXT    NOT NULL,
            provider_org_id       TEXT,
            provider_api_key      TEXT    NOT NULL,
            concurrency_limit     INTEGER NOT NULL DEFAULT 10,
            last_reported_current INTEGER,
            last_sync_at          TEXT,
            active                INTEGER NOT NULL DEFAULT 1,
            created_at            TEXT    NOT NULL,
            updated_at            TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_umbrellas_org ON umbrellas (provider_org_id);

        CREATE TABLE IF NOT EXISTS tenant_umbrella_assignments (
            tenant_id       TEXT    NOT NULL PRIMARY KEY,
            umbrella_id     TEXT    NOT NULL,
            tenant_cap      INTEGER NOT NULL DEFAULT 0,   -- 0 = uncapped
            priority_weight REAL    NOT NULL DEFAULT 1.0,
            created_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_assignments_umbrella
            ON tenant_umbrella_assignments (umbrella_id);",
    )
}
