//! Self-healing: one decision per dispatch failure.
//!
//! The healer owns enrollment channel overrides and the contact validity
//! checks the scheduler runs before dispatch. `handle_failure` appends the
//! failure record, picks exactly one action by policy, applies the store
//! side effects, and writes a healing log entry. Healing is never retried —
//! a second failure is a new failure with its own decision.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use cadence_core::types::{Channel, FailureRecord, FailureType, StepContent};
use cadence_store::types::{Contact, Enrollment, HealingRecord};
use cadence_store::Store;

use crate::error::Result;
use crate::types::{ContactValidity, HealingAction, HealingDecision};

/// No-answer/busy results tolerated before the healer substitutes an SMS.
const VOICE_NO_ANSWER_THRESHOLD: usize = 3;
/// Extension applied while a voice number is still being tried.
const NO_ANSWER_EXTEND_SECS: u64 = 4 * 3600;

pub struct SelfHealer {
    store: Arc<Store>,
}

impl SelfHealer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Active substitution for a channel, if a past failure installed one.
    pub fn channel_override(enrollment: &Enrollment, channel: Channel) -> Option<Channel> {
        enrollment.channel_overrides.get(&channel).copied()
    }

    /// Can this contact be reached on `channel` at all?
    pub fn check_contact_validity(contact: &Contact, channel: Channel) -> ContactValidity {
        match channel {
            Channel::Voice => match &contact.phone {
                None => ContactValidity::invalid(
                    FailureType::NoContactMethod,
                    "contact has no phone number",
                ),
                Some(_) if contact.landline => ContactValidity::invalid(
                    FailureType::LandlineDetected,
                    "phone is flagged landline",
                ),
                Some(_) => ContactValidity::ok(),
            },
            Channel::Sms => match &contact.phone {
                None => ContactValidity::invalid(
                    FailureType::NoContactMethod,
                    "contact has no phone number",
                ),
                Some(_) if contact.landline => ContactValidity::invalid(
                    FailureType::LandlineDetected,
                    "landline cannot receive sms",
                ),
                Some(_) => ContactValidity::ok(),
            },
            Channel::Email => match &contact.email {
                None => ContactValidity::invalid(
                    FailureType::NoContactMethod,
                    "contact has no email address",
                ),
                Some(_) => ContactValidity::ok(),
            },
        }
    }

    /// Record the failure, decide, apply, log. Returns the decision so the
    /// caller (healing worker) can enqueue any substitute dispatch.
    pub async fn handle_failure(
        &self,
        enrollment: &Enrollment,
        contact: &Contact,
        step_order: u32,
        channel: Channel,
        failure_type: FailureType,
        detail: &str,
    ) -> Result<HealingDecision> {
        let enrollment_id = enrollment.id.as_str();

        self.store.append_failure(
            enrollment_id,
            &FailureRecord {
                channel,
                failure_type,
                step_order,
                detail: detail.to_string(),
                occurred_at: Utc::now().to_rfc3339(),
            },
        )?;

        let action = self.decide(enrollment, contact, channel, failure_type);
        self.apply(enrollment, contact, channel, failure_type, &action)?;

        self.store.log_healing(&HealingRecord {
            enrollment_id: enrollment_id.to_string(),
            step_order,
            failure_type: failure_type.to_string(),
            action: action.to_string(),
            detail: detail.to_string(),
        })?;
        info!(
            enrollment_id,
            step_order,
            %failure_type,
            action = %action,
            "healing decision applied"
        );

        Ok(HealingDecision {
            action,
            failure_type,
            detail: detail.to_string(),
        })
    }

    /// The policy table. Exactly one action per (channel, failure) pair.
    fn decide(
        &self,
        enrollment: &Enrollment,
        contact: &Contact,
        channel: Channel,
        failure_type: FailureType,
    ) -> HealingAction {
        let has_email = contact.email.is_some();
        let has_mobile = contact.phone.is_some() && !contact.landline;

        match (channel, failure_type) {
            // Dead-end contact for this channel: try the next channel with a
            // usable address, otherwise the sequence cannot continue.
            (from, FailureType::NoContactMethod) => {
                if from != Channel::Email && has_email {
                    HealingAction::SwitchChannel {
                        from,
                        to: Channel::Email,
                    }
                } else if from != Channel::Sms && has_mobile {
                    HealingAction::SwitchChannel {
                        from,
                        to: Channel::Sms,
                    }
                } else {
                    HealingAction::MarkInvalid {
                        reason: "no usable contact method".into(),
                    }
                }
            }

            // Landline on voice: prefer email (texting the same number is
            // equally dead), fall back to sms only when no email exists.
            (Channel::Voice, FailureType::LandlineDetected) => HealingAction::SwitchChannel {
                from: Channel::Voice,
                to: if has_email { Channel::Email } else { Channel::Sms },
            },

            // Landline discovered via an sms failure: future voice steps
            // are pre-emptively overridden to sms-free channels; the
            // current step moves to email when possible.
            (Channel::Sms, FailureType::LandlineDetected)
            | (Channel::Sms, FailureType::InvalidNumber) => {
                if has_email {
                    HealingAction::SwitchChannel {
                        from: Channel::Sms,
                        to: Channel::Email,
                    }
                } else {
                    HealingAction::EndSequence {
                        reason: "number undeliverable and no email on file".into(),
                    }
                }
            }

            (Channel::Sms, FailureType::DeliveryFailed)
            | (Channel::Sms, FailureType::ProviderRejected) => {
                if has_email {
                    HealingAction::SwitchChannel {
                        from: Channel::Sms,
                        to: Channel::Email,
                    }
                } else {
                    HealingAction::EndSequence {
                        reason: "sms undeliverable and no email on file".into(),
                    }
                }
            }

            (Channel::Email, FailureType::Bounced)
            | (Channel::Email, FailureType::ProviderRejected)
            | (Channel::Email, FailureType::DeliveryFailed) => {
                if has_mobile {
                    HealingAction::SwitchChannel {
                        from: Channel::Email,
                        to: Channel::Sms,
                    }
                } else {
                    HealingAction::EndSequence {
                        reason: "email bounced and no mobile number on file".into(),
                    }
                }
            }

            (Channel::Voice, FailureType::NoAnswer) => {
                let strikes = enrollment
                    .failure_history
                    .iter()
                    .filter(|f| {
                        f.channel == Channel::Voice && f.failure_type == FailureType::NoAnswer
                    })
                    .count();
                if strikes >= VOICE_NO_ANSWER_THRESHOLD && has_mobile {
                    HealingAction::FallbackSms {
                        body: format!(
                            "Hi {}, we tried reaching you by phone — reply here if texting is easier.",
                            first_name(&contact.display_name)
                        ),
                    }
                } else {
                    HealingAction::ExtendDelay {
                        additional_secs: NO_ANSWER_EXTEND_SECS,
                    }
                }
            }

            (Channel::Voice, FailureType::CallFailed)
            | (Channel::Voice, FailureType::InvalidNumber)
            | (Channel::Voice, FailureType::ProviderRejected) => {
                if has_mobile {
                    HealingAction::SwitchChannel {
                        from: Channel::Voice,
                        to: Channel::Sms,
                    }
                } else if has_email {
                    HealingAction::SwitchChannel {
                        from: Channel::Voice,
                        to: Channel::Email,
                    }
                } else {
                    HealingAction::EndSequence {
                        reason: "voice unreachable and no other channel on file".into(),
                    }
                }
            }

            // Capacity exhaustion is not a contact problem; give the
            // umbrella room and let the sequence continue later.
            (_, FailureType::CapacityExhausted) => HealingAction::ExtendDelay {
                additional_secs: 1800,
            },

            // Remaining combinations: conservative delay extension.
            _ => HealingAction::ExtendDelay {
                additional_secs: NO_ANSWER_EXTEND_SECS,
            },
        }
    }

    fn apply(
        &self,
        enrollment: &Enrollment,
        contact: &Contact,
        channel: Channel,
        failure_type: FailureType,
        action: &HealingAction,
    ) -> Result<()> {
        let enrollment_id = enrollment.id.as_str();

        if failure_type == FailureType::LandlineDetected {
            self.store.set_contact_landline(contact.id.as_str(), true)?;
            // Future voice steps must not dial a landline, regardless of
            // which channel exposed it.
            if channel != Channel::Voice {
                let to = if contact.email.is_some() {
                    Channel::Email
                } else {
                    Channel::Sms
                };
                self.store
                    .set_channel_override(enrollment_id, Channel::Voice, to)?;
            }
        }

        match action {
            HealingAction::SwitchChannel { from, to } => {
                self.store.set_channel_override(enrollment_id, *from, *to)?;
                // Pre-check failures leave the fire time due; a prompt
                // reschedule lets the next tick redispatch on the new
                // channel without spinning in the same tick.
                self.store
                    .reschedule(enrollment_id, &Utc::now().to_rfc3339())?;
            }
            HealingAction::FallbackSms { .. } => {
                // The healing worker enqueues the substitute job.
            }
            HealingAction::ExtendDelay { additional_secs } => {
                let next = Utc::now() + chrono::Duration::seconds(*additional_secs as i64);
                self.store.reschedule(enrollment_id, &next.to_rfc3339())?;
            }
            HealingAction::EndSequence { reason } => {
                self.store.fail_enrollment(enrollment_id, reason)?;
            }
            HealingAction::MarkInvalid { reason } => {
                self.store.fail_enrollment(enrollment_id, reason)?;
            }
        }
        Ok(())
    }
}

/// Re-shape rendered content for a substituted channel. Used when an active
/// override moves a step to another channel at dispatch time: the step's
/// payload was authored for the original channel.
pub fn substitute_content(content: &StepContent, to: Channel) -> StepContent {
    let body = match content {
        StepContent::Sms { body } => body.clone(),
        StepContent::Email { text, html, .. } => {
            if text.trim().is_empty() {
                html.clone()
            } else {
                text.clone()
            }
        }
        StepContent::Voice { first_message, .. } => first_message.clone(),
    };
    match to {
        Channel::Sms => StepContent::Sms { body },
        Channel::Email => match content {
            StepContent::Email { .. } => content.clone(),
            _ => StepContent::Email {
                subject: "Following up".into(),
                html: format!("<p>{body}</p>"),
                text: body,
            },
        },
        Channel::Voice => match content {
            StepContent::Voice { .. } => content.clone(),
            _ => StepContent::Voice {
                first_message: body,
                system_prompt: "You are a friendly follow-up assistant. Deliver the message and answer basic questions.".into(),
                assistant_id: None,
                overrides: None,
            },
        },
    }
}

fn first_name(display_name: &str) -> String {
    display_name
        .split_whitespace()
        .next()
        .unwrap_or("there")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::{EnrollmentId, EnrollmentStatus};

    fn test_store() -> Arc<Store> {
        Arc::new(Store::from_connection(rusqlite::Connection::open_in_memory().unwrap()).unwrap())
    }

    fn contact(phone: Option<&str>, email: Option<&str>, landline: bool) -> Contact {
        Contact {
            id: "c1".into(),
            tenant_id: "t1".into(),
            display_name: "Dana Smith".into(),
            phone: phone.map(String::from),
            email: email.map(String::from),
            company: None,
            custom_fields: Default::default(),
            landline,
            engagement_score: 50,
            sentiment_trend: Default::default(),
            conversation_summary: None,
        }
    }

    fn enrollment(store: &Store) -> Enrollment {
        let now = Utc::now().to_rfc3339();
        let e = Enrollment {
            id: EnrollmentId::new(),
            tenant_id: "t1".into(),
            contact_id: "c1".into(),
            sequence_id: "seq1".into(),
            current_step_order: 1,
            next_fire_time: Some(now.clone()),
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
            total_attempts: 1,
            enrolled_at: now.clone(),
            updated_at: now,
        };
        store.create_enrollment(&e).unwrap();
        store.create_contact(&contact(Some("+15551234567"), Some("d@example.com"), false)).unwrap();
        e
    }

    #[test]
    fn validity_checks_cover_all_channels() {
        let no_phone = contact(None, Some("a@b.c"), false);
        let v = SelfHealer::check_contact_validity(&no_phone, Channel::Voice);
        assert!(!v.valid);
        assert_eq!(v.failure_type, Some(FailureType::NoContactMethod));

        let landline = contact(Some("+15550001111"), None, true);
        let v = SelfHealer::check_contact_validity(&landline, Channel::Voice);
        assert_eq!(v.failure_type, Some(FailureType::LandlineDetected));
        let v = SelfHealer::check_contact_validity(&landline, Channel::Sms);
        assert_eq!(v.failure_type, Some(FailureType::LandlineDetected));

        let fine = contact(Some("+15550001111"), Some("a@b.c"), false);
        assert!(SelfHealer::check_contact_validity(&fine, Channel::Voice).valid);
        assert!(SelfHealer::check_contact_validity(&fine, Channel::Email).valid);
    }

    #[tokio::test]
    async fn sms_landline_failure_installs_overrides_and_switches_to_email() {
        let store = test_store();
        let healer = SelfHealer::new(store.clone());
        let e = enrollment(&store);
        let c = contact(Some("+15551234567"), Some("d@example.com"), true);

        let decision = healer
            .handle_failure(
                &e,
                &c,
                1,
                Channel::Sms,
                FailureType::LandlineDetected,
                "carrier says landline",
            )
            .await
            .unwrap();

        assert_eq!(
            decision.action,
            HealingAction::SwitchChannel {
                from: Channel::Sms,
                to: Channel::Email
            }
        );

        let got = store.enrollment(e.id.as_str()).unwrap().unwrap();
        // Current-step switch plus the pre-emptive voice override.
        assert_eq!(got.channel_overrides[&Channel::Sms], Channel::Email);
        assert_eq!(got.channel_overrides[&Channel::Voice], Channel::Email);
        assert_eq!(got.failure_history.len(), 1);

        // Exactly one healing decision logged.
        assert_eq!(store.healing_count(e.id.as_str()).unwrap(), 1);
    }

    #[tokio::test]
    async fn undeliverable_sms_without_email_ends_the_sequence() {
        let store = test_store();
        let healer = SelfHealer::new(store.clone());
        let e = enrollment(&store);
        let c = contact(Some("+15551234567"), None, false);

        let decision = healer
            .handle_failure(
                &e,
                &c,
                2,
                Channel::Sms,
                FailureType::InvalidNumber,
                "invalid number",
            )
            .await
            .unwrap();

        assert!(matches!(decision.action, HealingAction::EndSequence { .. }));
        let got = store.enrollment(e.id.as_str()).unwrap().unwrap();
        assert_eq!(got.status, EnrollmentStatus::Failed);
        assert!(got.next_fire_time.is_none());
    }

    #[tokio::test]
    async fn repeated_no_answer_falls_back_to_sms() {
        let store = test_store();
        let healer = SelfHealer::new(store.clone());
        let mut e = enrollment(&store);
        let c = contact(Some("+15551234567"), None, false);

        // First two no-answers extend the delay.
        let d1 = healer
            .handle_failure(&e, &c, 1, Channel::Voice, FailureType::NoAnswer, "no answer")
            .await
            .unwrap();
        assert!(matches!(d1.action, HealingAction::ExtendDelay { .. }));

        // Simulate accumulated history (the decision reads the enrollment
        // snapshot it was handed).
        e.failure_history = (0..3)
            .map(|i| FailureRecord {
                channel: Channel::Voice,
                failure_type: FailureType::NoAnswer,
                step_order: 1,
                detail: format!("attempt {i}"),
                occurred_at: Utc::now().to_rfc3339(),
            })
            .collect();

        let d2 = healer
            .handle_failure(&e, &c, 1, Channel::Voice, FailureType::NoAnswer, "no answer")
            .await
            .unwrap();
        match d2.action {
            HealingAction::FallbackSms { body } => assert!(body.contains("Dana")),
            other => panic!("expected fallback sms, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_contact_method_with_no_alternatives_marks_invalid() {
        let store = test_store();
        let healer = SelfHealer::new(store.clone());
        let e = enrollment(&store);
        let c = contact(None, None, false);

        let decision = healer
            .handle_failure(
                &e,
                &c,
                1,
                Channel::Voice,
                FailureType::NoContactMethod,
                "nothing on file",
            )
            .await
            .unwrap();
        assert!(matches!(decision.action, HealingAction::MarkInvalid { .. }));
    }
}
