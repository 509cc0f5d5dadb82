//! Fixed job payload shapes. These are wire formats shared between the
//! scheduler, the channel workers, the event processor, and the webhook
//! surface — changes must stay backward compatible (additive fields with
//! serde defaults).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use cadence_core::types::{Channel, FailureType, StepContent};

/// Generic envelope wrapped around every queued payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope<T> {
    /// UUID v4, unique per enqueue (re-enqueues keep the id).
    pub id: String,
    /// Lower pops sooner. Channel jobs derive this from the sequence's
    /// urgency tier; events and healing default to 5.
    pub priority: u8,
    /// Monotonically increasing delivery attempt counter.
    pub attempt: u32,
    /// RFC 3339 UTC of the first enqueue.
    pub enqueued_at: String,
    pub payload: T,
}

/// Voice dispatch job. The slot-gated one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceJob {
    pub tenant_id: String,
    pub enrollment_id: String,
    pub step_id: String,
    pub step_order: u32,
    pub contact_id: String,
    pub phone: String,
    /// Rendered voice content (first message + system prompt with the
    /// conversation context and tone directive already appended).
    pub content: StepContent,
    /// Urgency-derived priority, preserved across capacity re-enqueues.
    pub priority: u8,
    /// Failed slot-acquisition count; the job is dropped as
    /// capacity-exhausted when this passes the configured ceiling.
    #[serde(default)]
    pub retry: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsJob {
    pub tenant_id: String,
    pub enrollment_id: String,
    pub step_id: String,
    pub step_order: u32,
    pub contact_id: String,
    pub phone: String,
    pub body: String,
    #[serde(default)]
    pub retry: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    pub tenant_id: String,
    pub enrollment_id: String,
    pub step_id: String,
    pub step_order: u32,
    pub contact_id: String,
    pub to_address: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    #[serde(default)]
    pub retry: u32,
}

/// Normalized provider webhook, enqueued by the HTTP surface and consumed
/// by the event processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProviderEvent {
    CallOutcome {
        call_id: String,
        disposition: String,
        #[serde(default)]
        duration_secs: i64,
        #[serde(default)]
        transcript: String,
        #[serde(default)]
        appointment_booked: bool,
        #[serde(default)]
        ended_reason: String,
        /// Metadata envelope echoed back by the provider.
        tenant_id: Option<String>,
        umbrella_id: Option<String>,
        enrollment_id: Option<String>,
    },
    SmsReply {
        provider_id: String,
        from_phone: String,
        body: String,
        tenant_id: Option<String>,
        enrollment_id: Option<String>,
    },
    SmsDelivery {
        provider_id: String,
        /// `delivered`, `undelivered`, `failed`.
        status: String,
        tenant_id: Option<String>,
        enrollment_id: Option<String>,
        #[serde(default)]
        step_order: Option<u32>,
    },
    EmailOpened {
        provider_id: String,
        tenant_id: Option<String>,
        enrollment_id: Option<String>,
    },
    EmailClicked {
        provider_id: String,
        tenant_id: Option<String>,
        enrollment_id: Option<String>,
    },
    EmailBounced {
        provider_id: String,
        tenant_id: Option<String>,
        enrollment_id: Option<String>,
        #[serde(default)]
        step_order: Option<u32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventJob {
    pub event: ProviderEvent,
}

/// One dispatch failure handed to the self-healer. Exactly one healing
/// decision is made per job; healing jobs are never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingJob {
    pub enrollment_id: String,
    pub step_order: u32,
    pub channel: Channel,
    pub failure_type: FailureType,
    pub detail: String,
    /// Extra provider context (error codes, bounce classes).
    #[serde(default)]
    pub context: HashMap<String, String>,
}
