//! The per-enrollment dispatch pipeline, in contract order: exhaustion,
//! timeout, human hold, skip conditions, business-hours gate, regulatory
//! gate, context, variables, A/B draw, rendering, mutation, healing
//! pre-checks, dispatch, advance.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cadence_adapt::heal::substitute_content;
use cadence_adapt::render::{bind_variables, render_content};
use cadence_adapt::variants::select_variant;
use cadence_adapt::{MutationVerdict, Mutator, SelfHealer};
use cadence_bus::{EmailJob, HealingJob, QueueName, SmsJob, VoiceJob};
use cadence_core::clock::{self, BusinessHours};
use cadence_core::types::{Channel, StepContent};
use cadence_store::types::{
    Contact, Enrollment, ExecutionRecord, MutationRecord, Sequence, SequenceStep, TenantProfile,
};

use crate::delay::adjusted_delay_secs;
use crate::engine::SchedulerEngine;
use crate::error::Result;

/// Recognized skip-condition predicate keys.
const SKIP_CONTACT_REPLIED: &str = "contact_replied";
const SKIP_ANSWERED_CALL: &str = "contact_answered_call";
const SKIP_APPOINTMENT_BOOKED: &str = "appointment_booked";

/// Deferral applied after an invalid-contact pre-check so healing can land
/// before the next attempt.
const HEALING_GRACE_SECS: i64 = 600;

impl SchedulerEngine {
    pub(crate) async fn process_enrollment(
        &self,
        enrollment: Enrollment,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let enrollment_id = enrollment.id.as_str().to_string();

        let Some(sequence) = self.store.sequence(&enrollment.sequence_id)? else {
            warn!(enrollment_id = %enrollment_id, sequence_id = %enrollment.sequence_id,
                  "sequence row missing, failing enrollment");
            self.store
                .fail_enrollment(&enrollment_id, "sequence missing")?;
            return Ok(());
        };

        // Timeout supplement: stale enrollments fail instead of firing.
        if timed_out(&enrollment.enrolled_at, sequence.timeout_hours, now) {
            info!(enrollment_id = %enrollment_id, "sequence timeout reached");
            self.store.fail_enrollment(&enrollment_id, "timeout")?;
            return Ok(());
        }

        // 1. Next step; absence means the sequence is exhausted.
        let next_order = enrollment.current_step_order + 1;
        let Some(step) = self.store.step(&sequence.id, next_order)? else {
            info!(enrollment_id = %enrollment_id, "sequence exhausted, completing");
            self.store.complete_enrollment(&enrollment_id)?;
            return Ok(());
        };

        // 2. Human-intervention hold: leave untouched until cleared.
        if enrollment.needs_human_intervention {
            debug!(enrollment_id = %enrollment_id, "held for human intervention");
            return Ok(());
        }

        // 3. Skip conditions advance without dispatching.
        if let Some(matched) = skip_condition_met(&step.skip_conditions, &enrollment) {
            info!(enrollment_id = %enrollment_id, step = step.step_order, condition = matched,
                  "skip condition matched, advancing without dispatch");
            let next_fire = self.fire_time_after(&sequence, step.step_order, &enrollment, now)?;
            self.store
                .advance_skipped(&enrollment_id, step.step_order, Some(&next_fire))?;
            return Ok(());
        }

        let tenant = self.store.tenant(enrollment.tenant_id.as_str())?;
        let (tz, hours) = match &tenant {
            Some(t) => (clock::tenant_tz(&t.timezone), t.business_hours),
            None => {
                warn!(enrollment_id = %enrollment_id, tenant_id = %enrollment.tenant_id,
                      "tenant profile missing, using UTC defaults");
                (chrono_tz::Tz::UTC, BusinessHours::default())
            }
        };

        // 4 + 5. Business-hours and regulatory gates.
        if let Some(deferred_to) =
            gate_deferral(step.channel, sequence.respect_business_hours, tz, &hours, now)
        {
            debug!(enrollment_id = %enrollment_id, step = step.step_order,
                   deferred_to = %deferred_to, "outside calling window, deferring");
            self.store
                .reschedule(&enrollment_id, &deferred_to.to_rfc3339())?;
            return Ok(());
        }

        let Some(contact) = self.store.contact(enrollment.contact_id.as_str())? else {
            warn!(enrollment_id = %enrollment_id, contact_id = %enrollment.contact_id,
                  "contact row missing, failing enrollment");
            self.store
                .fail_enrollment(&enrollment_id, "contact missing")?;
            return Ok(());
        };

        // 6. Conversation context (best-effort inside the memory crate).
        let context = self
            .memory
            .build(&enrollment_id, contact.id.as_str());

        // 7. Variable binding.
        let vars = bind_variables(&contact, &enrollment, &context.variables);

        // 8. A/B variant selection.
        let mut selected_variant: Option<String> = None;
        let mut content = step.content.clone();
        let variants = self.store.variants_for_step(&step.id)?;
        if let Some(variant) = select_variant(&variants, &mut rand::thread_rng()) {
            selected_variant = Some(variant.id.clone());
            content = variant.content.clone();
        }

        // 9. Rendering.
        let rendered = render_content(&content, &vars);

        // 10. Adaptive mutation.
        let mut outgoing = rendered.clone();
        if Mutator::preconditions_met(&sequence, &step, &enrollment, &context) {
            let tenant_profile = tenant.unwrap_or_else(|| default_tenant(&enrollment));
            match self
                .mutator
                .mutate(&rendered, &sequence, &step, &tenant_profile, &context, &vars)
                .await
            {
                MutationVerdict::Applied {
                    content: mutated,
                    confidence,
                    model,
                } => {
                    self.store.record_mutation(&MutationRecord {
                        id: Uuid::new_v4().to_string(),
                        enrollment_id: enrollment.id.clone(),
                        step_id: step.id.clone(),
                        step_order: step.step_order,
                        channel: step.channel,
                        original: rendered.clone(),
                        rewritten: mutated.clone(),
                        confidence,
                        aggressiveness: sequence.mutation_aggressiveness,
                        model,
                        resulted_in_reply: false,
                        resulted_in_conversion: false,
                        created_at: now.to_rfc3339(),
                    })?;
                    outgoing = mutated;
                }
                MutationVerdict::Discarded { reason } => {
                    let action = if reason.starts_with("confidence") {
                        "mutation_discarded_low_confidence"
                    } else {
                        "mutation_discarded"
                    };
                    self.store.log_execution(&ExecutionRecord {
                        tenant_id: enrollment.tenant_id.as_str().to_string(),
                        enrollment_id: Some(enrollment_id.clone()),
                        step_order: Some(step.step_order),
                        action: action.into(),
                        status: "skipped".into(),
                        provider_call_id: None,
                        detail: Some(reason),
                    })?;
                }
                MutationVerdict::Skipped => {}
            }
        }

        // 11. Self-healing pre-checks: active override, then validity.
        let dispatch_channel =
            SelfHealer::channel_override(&enrollment, step.channel).unwrap_or(step.channel);
        let validity = SelfHealer::check_contact_validity(&contact, dispatch_channel);
        if !validity.valid {
            let failure_type = validity
                .failure_type
                .unwrap_or(cadence_core::types::FailureType::NoContactMethod);
            warn!(enrollment_id = %enrollment_id, channel = %dispatch_channel,
                  failure = %failure_type, "contact invalid for channel, routing to healer");
            self.bus
                .enqueue(
                    QueueName::Healing,
                    &HealingJob {
                        enrollment_id: enrollment_id.clone(),
                        step_order: step.step_order,
                        channel: dispatch_channel,
                        failure_type,
                        detail: validity.reason,
                        context: Default::default(),
                    },
                    5,
                    0,
                )
                .await?;
            // Give healing room; the healer reschedules sooner if it fixes
            // the channel.
            let grace = now + ChronoDuration::seconds(HEALING_GRACE_SECS);
            self.store.reschedule(&enrollment_id, &grace.to_rfc3339())?;
            return Ok(());
        }

        if dispatch_channel != step.channel {
            outgoing = substitute_content(&outgoing, dispatch_channel);
        }

        // 12. Dispatch.
        if let Err(e) = self
            .dispatch(&enrollment, &sequence, &step, &contact, outgoing, &context, dispatch_channel)
            .await
        {
            // Not advanced: the next tick retries the same step.
            warn!(enrollment_id = %enrollment_id, error = %e, "dispatch enqueue failed, will retry next tick");
            return Ok(());
        }

        if let Some(variant_id) = &selected_variant {
            self.store.record_variant_sent(variant_id)?;
            self.store
                .record_selected_variant(&enrollment_id, step.step_order, variant_id)?;
        }

        // 13. Advance past the dispatched step.
        let next_fire = self.fire_time_after(&sequence, step.step_order, &enrollment, now)?;
        self.store
            .advance_after_dispatch(&enrollment_id, step.step_order, Some(&next_fire))?;
        info!(enrollment_id = %enrollment_id, step = step.step_order, channel = %dispatch_channel,
              next_fire = %next_fire, "step dispatched");
        Ok(())
    }

    /// Fire time for the step after `dispatched_order`: the following
    /// step's delay scaled by the emotion multiplier. When no step follows,
    /// the enrollment is due immediately so the next tick observes the
    /// exhaustion and completes it.
    fn fire_time_after(
        &self,
        sequence: &Sequence,
        dispatched_order: u32,
        enrollment: &Enrollment,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let next = self.store.step(&sequence.id, dispatched_order + 1)?;
        let fire = match next {
            Some(step) => {
                let secs = adjusted_delay_secs(step.delay_seconds, &enrollment.emotional_state);
                now + ChronoDuration::seconds(secs as i64)
            }
            None => now,
        };
        Ok(fire.to_rfc3339())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        enrollment: &Enrollment,
        sequence: &Sequence,
        step: &SequenceStep,
        contact: &Contact,
        content: StepContent,
        context: &cadence_memory::ConversationContext,
        channel: Channel,
    ) -> Result<()> {
        let priority = sequence.urgency.queue_priority();
        let enrollment_id = enrollment.id.as_str().to_string();
        let tenant_id = enrollment.tenant_id.as_str().to_string();
        let contact_id = contact.id.as_str().to_string();

        match (channel, content) {
            (Channel::Voice, StepContent::Voice {
                first_message,
                system_prompt,
                assistant_id,
                overrides,
            }) => {
                let phone = contact.phone.clone().unwrap_or_default();
                let system_prompt =
                    voice_system_prompt(&system_prompt, context, &enrollment.emotional_state);
                self.bus
                    .enqueue(
                        QueueName::Voice,
                        &VoiceJob {
                            tenant_id,
                            enrollment_id,
                            step_id: step.id.clone(),
                            step_order: step.step_order,
                            contact_id,
                            phone,
                            content: StepContent::Voice {
                                first_message,
                                system_prompt,
                                assistant_id,
                                overrides,
                            },
                            priority,
                            retry: 0,
                        },
                        priority,
                        0,
                    )
                    .await?;
            }
            (Channel::Sms, content) => {
                let body = match content {
                    StepContent::Sms { body } => body,
                    other => match substitute_content(&other, Channel::Sms) {
                        StepContent::Sms { body } => body,
                        _ => unreachable!("substitute_content(Sms) returns sms"),
                    },
                };
                self.bus
                    .enqueue(
                        QueueName::Sms,
                        &SmsJob {
                            tenant_id,
                            enrollment_id,
                            step_id: step.id.clone(),
                            step_order: step.step_order,
                            contact_id,
                            phone: contact.phone.clone().unwrap_or_default(),
                            body,
                            retry: 0,
                        },
                        priority,
                        0,
                    )
                    .await?;
            }
            (Channel::Email, content) => {
                let (subject, html, text) = match content {
                    StepContent::Email {
                        subject,
                        html,
                        text,
                    } => (subject, html, text),
                    other => match substitute_content(&other, Channel::Email) {
                        StepContent::Email {
                            subject,
                            html,
                            text,
                        } => (subject, html, text),
                        _ => unreachable!("substitute_content(Email) returns email"),
                    },
                };
                self.bus
                    .enqueue(
                        QueueName::Email,
                        &EmailJob {
                            tenant_id,
                            enrollment_id,
                            step_id: step.id.clone(),
                            step_order: step.step_order,
                            contact_id,
                            to_address: contact.email.clone().unwrap_or_default(),
                            subject,
                            html,
                            text,
                            retry: 0,
                        },
                        priority,
                        0,
                    )
                    .await?;
            }
            (Channel::Voice, other) => {
                // A non-voice payload routed to voice (override path).
                let substituted = substitute_content(&other, Channel::Voice);
                if let StepContent::Voice {
                    first_message,
                    system_prompt,
                    assistant_id,
                    overrides,
                } = substituted
                {
                    let system_prompt =
                        voice_system_prompt(&system_prompt, context, &enrollment.emotional_state);
                    self.bus
                        .enqueue(
                            QueueName::Voice,
                            &VoiceJob {
                                tenant_id,
                                enrollment_id,
                                step_id: step.id.clone(),
                                step_order: step.step_order,
                                contact_id,
                                phone: contact.phone.clone().unwrap_or_default(),
                                content: StepContent::Voice {
                                    first_message,
                                    system_prompt,
                                    assistant_id,
                                    overrides,
                                },
                                priority,
                                retry: 0,
                            },
                            priority,
                            0,
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Append the conversation context block and the tone directive to a voice
/// system prompt before enqueue.
fn voice_system_prompt(
    base: &str,
    context: &cadence_memory::ConversationContext,
    state: &cadence_core::analysis::EmotionalState,
) -> String {
    let mut prompt = base.to_string();
    if !context.formatted_timeline.is_empty() {
        prompt.push_str("\n\n## Conversation so far\n");
        prompt.push_str(&context.formatted_timeline);
    }
    let tone = state
        .recommended_tone
        .map(|t| t.to_string())
        .unwrap_or_else(|| "professional".into());
    prompt.push_str(&format!(
        "\n\n## Tone\nUse a {tone} tone. Conversation trend: {}.",
        state.sentiment_trend
    ));
    prompt
}

/// First matching recognized skip condition, if any.
fn skip_condition_met<'a>(conditions: &'a [String], enrollment: &Enrollment) -> Option<&'a str> {
    conditions.iter().map(String::as_str).find(|key| match *key {
        SKIP_CONTACT_REPLIED => enrollment.contact_replied,
        SKIP_ANSWERED_CALL => enrollment.answered_call,
        SKIP_APPOINTMENT_BOOKED => enrollment.appointment_booked,
        _ => false,
    })
}

/// Whether the enrollment outlived its sequence timeout.
fn timed_out(enrolled_at: &str, timeout_hours: Option<u32>, now: DateTime<Utc>) -> bool {
    let Some(hours) = timeout_hours else {
        return false;
    };
    let Ok(enrolled) = DateTime::parse_from_rfc3339(enrolled_at) else {
        return false;
    };
    now - enrolled.with_timezone(&Utc) > ChronoDuration::hours(hours as i64)
}

/// Combined business-hours + regulatory gate. Returns the deferred fire
/// time, or `None` when dispatch may proceed now. The business window is
/// applied first, then the candidate is clamped into the regulatory
/// [08:00, 21:00) window — a 07:00 business open still waits for 08:00.
fn gate_deferral(
    channel: Channel,
    respect_business_hours: bool,
    tz: Tz,
    hours: &BusinessHours,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !channel.is_time_gated() {
        return None;
    }

    let after_business = if respect_business_hours && !hours.always_open {
        clock::next_business_open(tz, hours, now)
    } else {
        now
    };
    let after_compliance = clock::next_compliance_open(tz, after_business);

    if after_compliance > now {
        Some(after_compliance)
    } else {
        None
    }
}

fn default_tenant(enrollment: &Enrollment) -> TenantProfile {
    TenantProfile {
        id: enrollment.tenant_id.clone(),
        display_name: String::new(),
        timezone: "UTC".into(),
        business_hours: BusinessHours::default(),
        brand_voice: None,
        custom_phrases: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::{EnrollmentId, EnrollmentStatus};
    use chrono::{Datelike, TimeZone, Timelike};

    fn la() -> Tz {
        "America/Los_Angeles".parse().unwrap()
    }

    fn la_instant(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        la().with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn enrollment() -> Enrollment {
        let now = Utc::now().to_rfc3339();
        Enrollment {
            id: EnrollmentId::new(),
            tenant_id: "t1".into(),
            contact_id: "c1".into(),
            sequence_id: "seq1".into(),
            current_step_order: 0,
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
            total_attempts: 0,
            enrolled_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn quiet_hours_defer_sms_to_next_morning() {
        // 22:15 local — regulatory gate pushes to 08:00 next day.
        let now = la_instant(2025, 3, 3, 22, 15);
        let deferred = gate_deferral(Channel::Sms, true, la(), &BusinessHours::default(), now)
            .expect("should defer");
        let local = deferred.with_timezone(&la());
        assert_eq!(local.hour(), 8);
        assert_eq!(local.minute(), 0);
        assert_eq!(local.day(), 4);
    }

    #[test]
    fn email_is_never_gated() {
        let now = la_instant(2025, 3, 3, 22, 15);
        assert!(gate_deferral(Channel::Email, true, la(), &BusinessHours::default(), now).is_none());
    }

    #[test]
    fn business_bypass_still_respects_compliance() {
        // respect_business_hours=false at 06:00 local: business gate off,
        // regulatory gate still pushes to 08:00.
        let now = la_instant(2025, 3, 3, 6, 0);
        let deferred =
            gate_deferral(Channel::Voice, false, la(), &BusinessHours::default(), now).unwrap();
        assert_eq!(deferred.with_timezone(&la()).hour(), 8);
    }

    #[test]
    fn early_business_open_clamps_to_compliance() {
        // Weekday window opening 07:00 — compliant dispatch waits for 08:00.
        let hours = BusinessHours {
            weekday: cadence_core::clock::DayWindow {
                open_hour: 7,
                close_hour: 18,
            },
            weekend: cadence_core::clock::DayWindow {
                open_hour: 7,
                close_hour: 18,
            },
            always_open: false,
        };
        let now = la_instant(2025, 3, 3, 5, 0);
        let deferred = gate_deferral(Channel::Sms, true, la(), &hours, now).unwrap();
        assert_eq!(deferred.with_timezone(&la()).hour(), 8);
    }

    #[test]
    fn midday_dispatch_is_not_deferred() {
        let now = la_instant(2025, 3, 3, 13, 0);
        assert!(gate_deferral(Channel::Sms, true, la(), &BusinessHours::default(), now).is_none());
    }

    #[test]
    fn skip_conditions_match_flags() {
        let mut e = enrollment();
        let conditions = vec![
            SKIP_CONTACT_REPLIED.to_string(),
            SKIP_APPOINTMENT_BOOKED.to_string(),
        ];
        assert!(skip_condition_met(&conditions, &e).is_none());

        e.appointment_booked = true;
        assert_eq!(
            skip_condition_met(&conditions, &e),
            Some(SKIP_APPOINTMENT_BOOKED)
        );

        e.contact_replied = true;
        // First listed match wins.
        assert_eq!(skip_condition_met(&conditions, &e), Some(SKIP_CONTACT_REPLIED));
    }

    #[test]
    fn unrecognized_skip_keys_are_ignored() {
        let mut e = enrollment();
        e.contact_replied = true;
        let conditions = vec!["someday_maybe".to_string()];
        assert!(skip_condition_met(&conditions, &e).is_none());
    }

    #[test]
    fn timeout_uses_enrolled_at() {
        let now: DateTime<Utc> = "2025-03-10T00:00:00+00:00".parse().unwrap();
        assert!(timed_out("2025-03-01T00:00:00+00:00", Some(72), now));
        assert!(!timed_out("2025-03-09T00:00:00+00:00", Some(72), now));
        assert!(!timed_out("2025-03-01T00:00:00+00:00", None, now));
    }

    #[test]
    fn voice_prompt_carries_context_and_tone() {
        use cadence_core::analysis::{EmotionalState, RecommendedTone, SentimentTrend};
        let mut context = cadence_memory::ConversationContext::default();
        context.formatted_timeline = "2025-03-01 · sms out: hello".into();
        let state = EmotionalState {
            recommended_tone: Some(RecommendedTone::Reassuring),
            sentiment_trend: SentimentTrend::Warming,
            ..Default::default()
        };
        let prompt = voice_system_prompt("You are a scheduler.", &context, &state);
        assert!(prompt.starts_with("You are a scheduler."));
        assert!(prompt.contains("## Conversation so far"));
        assert!(prompt.contains("sms out: hello"));
        assert!(prompt.contains("reassuring tone"));
        assert!(prompt.contains("warming"));
    }
}
