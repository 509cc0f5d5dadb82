use serde::{Deserialize, Serialize};
use std::fmt;

use cadence_core::types::{Channel, FailureType, StepContent};

/// Result of `check_contact_validity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactValidity {
    pub valid: bool,
    pub failure_type: Option<FailureType>,
    pub reason: String,
}

impl ContactValidity {
    pub fn ok() -> Self {
        Self {
            valid: true,
            failure_type: None,
            reason: String::new(),
        }
    }

    pub fn invalid(failure_type: FailureType, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            failure_type: Some(failure_type),
            reason: reason.into(),
        }
    }
}

/// The single action chosen for one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HealingAction {
    /// Install a channel override; future (and pre-check-failed current)
    /// steps dispatch on `to` instead of `from`.
    SwitchChannel { from: Channel, to: Channel },
    /// Inject a one-off plain SMS in place of the failed step.
    FallbackSms { body: String },
    /// Push the enrollment's next fire time out.
    ExtendDelay { additional_secs: u64 },
    /// Terminal: the enrollment fails with this reason.
    EndSequence { reason: String },
    /// Contact is unusable on this channel; flagged and ended.
    MarkInvalid { reason: String },
}

impl fmt::Display for HealingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealingAction::SwitchChannel { from, to } => write!(f, "switch_channel:{from}->{to}"),
            HealingAction::FallbackSms { .. } => write!(f, "fallback_sms"),
            HealingAction::ExtendDelay { additional_secs } => {
                write!(f, "extend_delay:{additional_secs}s")
            }
            HealingAction::EndSequence { .. } => write!(f, "end_sequence"),
            HealingAction::MarkInvalid { .. } => write!(f, "mark_invalid"),
        }
    }
}

/// What `handle_failure` decided and already applied to the store.
#[derive(Debug, Clone)]
pub struct HealingDecision {
    pub action: HealingAction,
    pub failure_type: FailureType,
    pub detail: String,
}

/// Outcome of a mutation attempt.
#[derive(Debug, Clone)]
pub enum MutationVerdict {
    /// Rewrite accepted; ships instead of the rendered original.
    Applied {
        content: StepContent,
        confidence: f64,
        model: String,
    },
    /// Rewrite rejected (low confidence, invariant violation, model error);
    /// the rendered original ships.
    Discarded { reason: String },
    /// Preconditions not met; mutation was never attempted.
    Skipped,
}
