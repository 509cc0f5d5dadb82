use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use cadence_core::analysis::{EmotionalAnalysis, EmotionalState, SentimentTrend};
use cadence_core::clock::BusinessHours;
use cadence_core::types::{
    Channel, ContactId, Direction, EnrollmentId, EnrollmentStatus, FailureRecord,
    MutationAggressiveness, StepContent, StepMutationOverride, TenantId, UmbrellaId, UrgencyTier,
};

/// Tenant row: timezone, calling windows, brand voice.
#[derive(Debug, Clone)]
pub struct TenantProfile {
    pub id: TenantId,
    pub display_name: String,
    pub timezone: String,
    pub business_hours: BusinessHours,
    pub brand_voice: Option<String>,
    pub custom_phrases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub custom_fields: HashMap<String, String>,
    /// Set by the self-healer when a voice provider reports a landline.
    pub landline: bool,
    pub engagement_score: i64,
    pub sentiment_trend: SentimentTrend,
    pub conversation_summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Sequence {
    pub id: String,
    pub tenant_id: TenantId,
    pub name: String,
    pub urgency: UrgencyTier,
    pub respect_business_hours: bool,
    /// When set, an inbound reply moves the enrollment to `replied` and the
    /// automation stops; when clear, replies only raise the skip flag.
    pub stop_on_reply: bool,
    pub mutation_enabled: bool,
    pub mutation_aggressiveness: MutationAggressiveness,
    pub timeout_hours: Option<u32>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct SequenceStep {
    pub id: String,
    pub sequence_id: String,
    /// 1-based position within the sequence.
    pub step_order: u32,
    pub channel: Channel,
    pub delay_seconds: u64,
    pub content: StepContent,
    /// Predicate keys checked against enrollment flags before dispatch.
    pub skip_conditions: Vec<String>,
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
    pub mutation_override: StepMutationOverride,
    pub mutation_instructions: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StepVariant {
    pub id: String,
    pub step_id: String,
    pub label: String,
    pub content: StepContent,
    pub weight: f64,
    pub active: bool,
    pub sent_count: u64,
    pub reply_count: u64,
    pub conversion_count: u64,
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub sequence_id: String,
    /// 0 means step 1 has not been dispatched yet. Never decreases.
    pub current_step_order: u32,
    /// RFC 3339 UTC; `None` iff `status.is_terminal()`.
    pub next_fire_time: Option<String>,
    pub status: EnrollmentStatus,
    pub status_reason: Option<String>,
    pub custom_variables: HashMap<String, String>,
    pub contact_replied: bool,
    pub answered_call: bool,
    pub appointment_booked: bool,
    pub needs_human_intervention: bool,
    pub emotional_state: EmotionalState,
    /// Active channel substitutions installed by the self-healer.
    pub channel_overrides: HashMap<Channel, Channel>,
    pub failure_history: Vec<FailureRecord>,
    /// step_order → variant id, recorded at dispatch for A/B attribution.
    pub selected_variants: HashMap<String, String>,
    pub total_attempts: u32,
    pub enrolled_at: String,
    pub updated_at: String,
}

/// A new interaction row. `provider_id` + `event_type` drive webhook replay
/// idempotence; rows without a provider id always insert.
#[derive(Debug, Clone, Default)]
pub struct NewInteraction {
    pub tenant_id: String,
    pub contact_id: String,
    pub enrollment_id: Option<String>,
    pub channel: String,
    pub direction: String,
    pub content: String,
    pub outcome: Option<String>,
    pub sentiment: Option<String>,
    pub intent: Option<String>,
    pub call_duration_secs: Option<i64>,
    pub call_disposition: Option<String>,
    pub objections: Option<String>,
    pub key_topics: Option<String>,
    pub provider_id: Option<String>,
    pub event_type: Option<String>,
    pub analysis: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: String,
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub enrollment_id: Option<EnrollmentId>,
    pub channel: Channel,
    pub direction: Direction,
    pub content: String,
    pub outcome: Option<String>,
    pub sentiment: Option<String>,
    pub intent: Option<String>,
    pub call_duration_secs: Option<i64>,
    pub call_disposition: Option<String>,
    pub objections: Vec<String>,
    pub key_topics: Vec<String>,
    pub provider_id: Option<String>,
    pub event_type: Option<String>,
    pub analysis: Option<EmotionalAnalysis>,
    pub created_at: String,
}

/// Per-enrollment interaction counters for the conversation context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionCounts {
    pub total: u64,
    pub calls: u64,
    pub sms: u64,
    pub emails: u64,
    pub inbound: u64,
    pub outbound: u64,
}

#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub id: String,
    pub enrollment_id: EnrollmentId,
    pub step_id: String,
    pub step_order: u32,
    pub channel: Channel,
    pub original: StepContent,
    pub rewritten: StepContent,
    pub confidence: f64,
    pub aggressiveness: MutationAggressiveness,
    pub model: String,
    pub resulted_in_reply: bool,
    pub resulted_in_conversion: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub tenant_id: String,
    pub enrollment_id: Option<String>,
    pub step_order: Option<u32>,
    /// e.g. `call_initiated`, `call_initiation_failed`, `skipped_capacity`,
    /// `mutation_discarded_low_confidence`, `slot_released`.
    pub action: String,
    pub status: String,
    pub provider_call_id: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HealingRecord {
    pub enrollment_id: String,
    pub step_order: u32,
    pub failure_type: String,
    pub action: String,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub tenant_id: String,
    pub enrollment_id: Option<String>,
    pub contact_id: Option<String>,
    /// `hot_lead`, `needs_human`, `objection_detected`, `at_risk`.
    pub kind: String,
    pub severity: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Umbrella {
    pub id: UmbrellaId,
    pub name: String,
    pub provider_org_id: Option<String>,
    pub provider_api_key: String,
    pub concurrency_limit: u32,
    pub last_reported_current: Option<u32>,
    pub last_sync_at: Option<String>,
    pub active: bool,
}

/// Joined tenant → umbrella assignment, what the resolver caches.
#[derive(Debug, Clone)]
pub struct UmbrellaAssignment {
    pub tenant_id: TenantId,
    pub umbrella_id: UmbrellaId,
    pub provider_api_key: String,
    pub concurrency_limit: u32,
    /// Soft fairness cap; 0 means uncapped.
    pub tenant_cap: u32,
    pub priority_weight: f64,
}
