use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Billing/customer unit that owns sequences, contacts, and enrollments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Addressable recipient of outbound touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub String);

impl ContactId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single contact's live traversal of a sequence (UUIDv7 — time-sortable
/// for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrollmentId(pub String);

impl EnrollmentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EnrollmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnrollmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EnrollmentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EnrollmentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Shared outbound-voice provider account whose concurrency limit is
/// multiplexed across many tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UmbrellaId(pub String);

impl UmbrellaId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UmbrellaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UmbrellaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UmbrellaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outbound communication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
    Voice,
}

impl Channel {
    /// Channels subject to the business-hours and regulatory gates.
    /// Email is exempt — inbox delivery time is not an interruption.
    pub fn is_time_gated(&self) -> bool {
        matches!(self, Channel::Sms | Channel::Voice)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Voice => "voice",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "voice" => Ok(Channel::Voice),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Sequence urgency tier. Drives the voice queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyTier {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl UrgencyTier {
    /// Queue priority integer — lower pops sooner.
    pub fn queue_priority(&self) -> u8 {
        match self {
            UrgencyTier::Critical => 1,
            UrgencyTier::High => 3,
            UrgencyTier::Medium => 5,
            UrgencyTier::Low => 8,
        }
    }
}

impl fmt::Display for UrgencyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UrgencyTier::Critical => "critical",
            UrgencyTier::High => "high",
            UrgencyTier::Medium => "medium",
            UrgencyTier::Low => "low",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for UrgencyTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "critical" => Ok(UrgencyTier::Critical),
            "high" => Ok(UrgencyTier::High),
            "medium" => Ok(UrgencyTier::Medium),
            "low" => Ok(UrgencyTier::Low),
            other => Err(format!("unknown urgency tier: {other}")),
        }
    }
}

/// Lifecycle state of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Replied,
    Booked,
    Failed,
    ManualStop,
}

impl EnrollmentStatus {
    /// Terminal states never fire again: `next_fire_time` must be null.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Completed
                | EnrollmentStatus::Booked
                | EnrollmentStatus::Failed
                | EnrollmentStatus::ManualStop
        )
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Paused => "paused",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Replied => "replied",
            EnrollmentStatus::Booked => "booked",
            EnrollmentStatus::Failed => "failed",
            EnrollmentStatus::ManualStop => "manual_stop",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "paused" => Ok(EnrollmentStatus::Paused),
            "completed" => Ok(EnrollmentStatus::Completed),
            "replied" => Ok(EnrollmentStatus::Replied),
            "booked" => Ok(EnrollmentStatus::Booked),
            "failed" => Ok(EnrollmentStatus::Failed),
            "manual_stop" => Ok(EnrollmentStatus::ManualStop),
            other => Err(format!("unknown enrollment status: {other}")),
        }
    }
}

/// How freely the mutator may rewrite a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MutationAggressiveness {
    #[default]
    Conservative,
    Moderate,
    Aggressive,
}

impl fmt::Display for MutationAggressiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationAggressiveness::Conservative => "conservative",
            MutationAggressiveness::Moderate => "moderate",
            MutationAggressiveness::Aggressive => "aggressive",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MutationAggressiveness {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conservative" => Ok(MutationAggressiveness::Conservative),
            "moderate" => Ok(MutationAggressiveness::Moderate),
            "aggressive" => Ok(MutationAggressiveness::Aggressive),
            other => Err(format!("unknown aggressiveness: {other}")),
        }
    }
}

/// Per-step mutation override. `Default` defers to the sequence flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepMutationOverride {
    #[default]
    Default,
    Enabled,
    Disabled,
}

impl std::str::FromStr for StepMutationOverride {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "default" => Ok(StepMutationOverride::Default),
            "enabled" => Ok(StepMutationOverride::Enabled),
            "disabled" => Ok(StepMutationOverride::Disabled),
            other => Err(format!("unknown mutation override: {other}")),
        }
    }
}

impl fmt::Display for StepMutationOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepMutationOverride::Default => "default",
            StepMutationOverride::Enabled => "enabled",
            StepMutationOverride::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

/// Direction of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Dispatch failure kinds routed to the self-healer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Contact has no usable address for the channel.
    NoContactMethod,
    /// Phone is flagged landline — voice is pointless, SMS undeliverable.
    LandlineDetected,
    /// Provider permanently rejected the number/address.
    InvalidNumber,
    ProviderRejected,
    DeliveryFailed,
    Bounced,
    NoAnswer,
    CallFailed,
    CapacityExhausted,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureType::NoContactMethod => "no_contact_method",
            FailureType::LandlineDetected => "landline_detected",
            FailureType::InvalidNumber => "invalid_number",
            FailureType::ProviderRejected => "provider_rejected",
            FailureType::DeliveryFailed => "delivery_failed",
            FailureType::Bounced => "bounced",
            FailureType::NoAnswer => "no_answer",
            FailureType::CallFailed => "call_failed",
            FailureType::CapacityExhausted => "capacity_exhausted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FailureType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "no_contact_method" => Ok(FailureType::NoContactMethod),
            "landline_detected" => Ok(FailureType::LandlineDetected),
            "invalid_number" => Ok(FailureType::InvalidNumber),
            "provider_rejected" => Ok(FailureType::ProviderRejected),
            "delivery_failed" => Ok(FailureType::DeliveryFailed),
            "bounced" => Ok(FailureType::Bounced),
            "no_answer" => Ok(FailureType::NoAnswer),
            "call_failed" => Ok(FailureType::CallFailed),
            "capacity_exhausted" => Ok(FailureType::CapacityExhausted),
            other => Err(format!("unknown failure type: {other}")),
        }
    }
}

/// One dispatch failure, kept on the enrollment for healing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub channel: Channel,
    pub failure_type: FailureType,
    pub step_order: u32,
    pub detail: String,
    /// RFC 3339 UTC.
    pub occurred_at: String,
}

/// Channel-specific step content. The tagged representation keeps SMS, email,
/// and voice fields from leaking across channels; validators at the queue and
/// dispatch boundaries call [`StepContent::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum StepContent {
    Sms {
        body: String,
    },
    Email {
        subject: String,
        html: String,
        text: String,
    },
    Voice {
        first_message: String,
        system_prompt: String,
        /// Provider-side assistant id to reuse instead of an inline config.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assistant_id: Option<String>,
        /// Extra variables forwarded verbatim to the voice provider.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<HashMap<String, String>>,
    },
}

impl StepContent {
    pub fn channel(&self) -> Channel {
        match self {
            StepContent::Sms { .. } => Channel::Sms,
            StepContent::Email { .. } => Channel::Email,
            StepContent::Voice { .. } => Channel::Voice,
        }
    }

    /// Reject empty required fields. Cross-channel leakage is impossible by
    /// construction; this catches templates that rendered to nothing.
    pub fn validate(&self) -> crate::error::Result<()> {
        match self {
            StepContent::Sms { body } => {
                if body.trim().is_empty() {
                    return Err(crate::error::CadenceError::InvalidContent(
                        "sms body is empty".into(),
                    ));
                }
            }
            StepContent::Email { subject, html, text } => {
                if subject.trim().is_empty() {
                    return Err(crate::error::CadenceError::InvalidContent(
                        "email subject is empty".into(),
                    ));
                }
                if html.trim().is_empty() && text.trim().is_empty() {
                    return Err(crate::error::CadenceError::InvalidContent(
                        "email has neither html nor text body".into(),
                    ));
                }
            }
            StepContent::Voice {
                first_message,
                system_prompt,
                ..
            } => {
                if first_message.trim().is_empty() {
                    return Err(crate::error::CadenceError::InvalidContent(
                        "voice first_message is empty".into(),
                    ));
                }
                if system_prompt.trim().is_empty() {
                    return Err(crate::error::CadenceError::InvalidContent(
                        "voice system_prompt is empty".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn urgency_maps_to_queue_priority() {
        assert_eq!(UrgencyTier::Critical.queue_priority(), 1);
        assert_eq!(UrgencyTier::High.queue_priority(), 3);
        assert_eq!(UrgencyTier::Medium.queue_priority(), 5);
        assert_eq!(UrgencyTier::Low.queue_priority(), 8);
    }

    #[test]
    fn terminal_statuses() {
        assert!(EnrollmentStatus::Completed.is_terminal());
        assert!(EnrollmentStatus::Booked.is_terminal());
        assert!(EnrollmentStatus::Failed.is_terminal());
        assert!(EnrollmentStatus::ManualStop.is_terminal());
        assert!(!EnrollmentStatus::Active.is_terminal());
        assert!(!EnrollmentStatus::Paused.is_terminal());
        assert!(!EnrollmentStatus::Replied.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            "active",
            "paused",
            "completed",
            "replied",
            "booked",
            "failed",
            "manual_stop",
        ] {
            let parsed = EnrollmentStatus::from_str(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn step_content_serde_is_channel_tagged() {
        let content = StepContent::Sms {
            body: "hi {{first_name}}".into(),
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["channel"], "sms");
        assert_eq!(json["body"], "hi {{first_name}}");
    }

    #[test]
    fn empty_sms_body_fails_validation() {
        let content = StepContent::Sms { body: "  ".into() };
        assert!(content.validate().is_err());
    }

    #[test]
    fn voice_requires_prompt_and_first_message() {
        let content = StepContent::Voice {
            first_message: "Hello!".into(),
            system_prompt: String::new(),
            assistant_id: None,
            overrides: None,
        };
        assert!(content.validate().is_err());
    }

    #[test]
    fn email_gates_only_sms_and_voice() {
        assert!(Channel::Sms.is_time_gated());
        assert!(Channel::Voice.is_time_gated());
        assert!(!Channel::Email.is_time_gated());
    }
}
