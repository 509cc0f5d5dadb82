use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use cadence_bus::{EventJob, HealingJob, JobBus, JobEnvelope, ProviderEvent, QueueName};
use cadence_core::analysis::{
    AnalysisOutcome, EmotionalAnalysis, Intent, ObjectionSeverity, Sentiment,
};
use cadence_core::types::{Channel, FailureType};
use cadence_memory::engagement::{compute_engagement, RECENT_WINDOW};
use cadence_memory::trend::compute_trend;
use cadence_memory::{analyzer::updated_state, ConversationMemory, EmotionalAnalyzer};
use cadence_store::types::{Enrollment, NewInteraction, Notification};
use cadence_store::Store;
use cadence_umbrella::{SlotLedger, UmbrellaCoordinator};

use crate::error::Result;

const IDLE_POLL: Duration = Duration::from_millis(500);
/// Calls at or above this duration count as answered even when the
/// disposition string is unhelpful.
const ANSWERED_MIN_SECS: i64 = 10;

/// Event worker. Clone one per pool slot — all state is shared.
#[derive(Clone)]
pub struct EventProcessor {
    store: Arc<Store>,
    bus: JobBus,
    coordinator: UmbrellaCoordinator,
    ledger: Arc<SlotLedger>,
    analyzer: Arc<EmotionalAnalyzer>,
    memory: Arc<ConversationMemory>,
    /// Per-enrollment serialization of state mutation. Interaction appends
    /// are lock-free.
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl EventProcessor {
    pub fn new(
        store: Arc<Store>,
        bus: JobBus,
        coordinator: UmbrellaCoordinator,
        ledger: Arc<SlotLedger>,
        analyzer: Arc<EmotionalAnalyzer>,
        memory: Arc<ConversationMemory>,
    ) -> Self {
        Self {
            store,
            bus,
            coordinator,
            ledger,
            analyzer,
            memory,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn run(self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id, "event processor started");
        loop {
            tokio::select! {
                result = self.bus.pop::<EventJob>(QueueName::Events) => {
                    match result {
                        Ok(Some(envelope)) => {
                            if let Err(e) = self.handle(envelope).await {
                                error!(worker_id, error = %e, "event processing failed");
                            }
                            continue;
                        }
                        Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                        Err(e) => {
                            error!(worker_id, error = %e, "events queue pop failed");
                            tokio::time::sleep(IDLE_POLL).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id, "event processor shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, envelope: JobEnvelope<EventJob>) -> Result<()> {
        match envelope.payload.event {
            ProviderEvent::CallOutcome {
                call_id,
                disposition,
                duration_secs,
                transcript,
                appointment_booked,
                ended_reason,
                tenant_id,
                umbrella_id,
                enrollment_id,
            } => {
                self.on_call_outcome(
                    &call_id,
                    &disposition,
                    duration_secs,
                    &transcript,
                    appointment_booked,
                    &ended_reason,
                    tenant_id.as_deref(),
                    umbrella_id.as_deref(),
                    enrollment_id.as_deref(),
                )
                .await
            }
            ProviderEvent::SmsReply {
                provider_id,
                from_phone,
                body,
                tenant_id: _,
                enrollment_id,
            } => {
                self.on_sms_reply(&provider_id, &from_phone, &body, enrollment_id.as_deref())
                    .await
            }
            ProviderEvent::SmsDelivery {
                provider_id,
                status,
                tenant_id: _,
                enrollment_id,
                step_order,
            } => {
                self.on_sms_delivery(&provider_id, &status, enrollment_id.as_deref(), step_order)
                    .await
            }
            ProviderEvent::EmailOpened {
                provider_id,
                tenant_id,
                enrollment_id,
            } => {
                self.on_email_engagement(
                    &provider_id,
                    "email-opened",
                    tenant_id.as_deref(),
                    enrollment_id.as_deref(),
                )
                .await
            }
            ProviderEvent::EmailClicked {
                provider_id,
                tenant_id,
                enrollment_id,
            } => {
                self.on_email_engagement(
                    &provider_id,
                    "email-clicked",
                    tenant_id.as_deref(),
                    enrollment_id.as_deref(),
                )
                .await
            }
            ProviderEvent::EmailBounced {
                provider_id,
                tenant_id: _,
                enrollment_id,
                step_order,
            } => {
                self.on_email_bounced(&provider_id, enrollment_id.as_deref(), step_order)
                    .await
            }
        }
    }

    // ── Call outcomes ─────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn on_call_outcome(
        &self,
        call_id: &str,
        disposition: &str,
        duration_secs: i64,
        transcript: &str,
        appointment_booked: bool,
        ended_reason: &str,
        tenant_id: Option<&str>,
        umbrella_id: Option<&str>,
        enrollment_id: Option<&str>,
    ) -> Result<()> {
        // Resolve enrollment: metadata first, then the interaction written
        // at initiation.
        let enrollment = match enrollment_id {
            Some(id) => self.store.enrollment(id)?,
            None => match self.store.interaction_by_provider_id(call_id)? {
                Some(i) => match i.enrollment_id {
                    Some(eid) => self.store.enrollment(eid.as_str())?,
                    None => None,
                },
                None => None,
            },
        };
        let Some(enrollment) = enrollment else {
            warn!(call_id, "call outcome for unknown enrollment, dropping");
            return Ok(());
        };
        let tenant = tenant_id
            .map(String::from)
            .unwrap_or_else(|| enrollment.tenant_id.as_str().to_string());

        // Slot release, exactly once per call id. The umbrella comes from
        // the webhook metadata, falling back to the current assignment.
        if self.store.try_mark_slot_released(&tenant, call_id)? {
            let umbrella = match umbrella_id {
                Some(u) => Some(u.to_string()),
                None => self
                    .store
                    .assignment_for_tenant(&tenant)?
                    .map(|a| a.umbrella_id.as_str().to_string()),
            };
            match umbrella {
                Some(u) => {
                    self.coordinator.release(&u, &tenant).await?;
                    self.ledger.forget(call_id);
                    debug!(call_id, umbrella = %u, "umbrella slot released");
                }
                None => warn!(call_id, tenant, "slot release without resolvable umbrella"),
            }
        }

        // The rest of the pipeline is a no-op on replay.
        if !self
            .store
            .try_mark_once(&tenant, call_id, "call_outcome_processed")?
        {
            return Ok(());
        }

        let lock = self.lock_for(enrollment.id.as_str());
        let _guard = lock.lock().await;

        // Analyze before the row update so the verdict lands with it.
        let analysis = if EmotionalAnalyzer::should_analyze_transcript(transcript) {
            self.analyzer
                .analyze_call(transcript, duration_secs, disposition)
                .await
        } else {
            AnalysisOutcome::Unavailable {
                reason: "transcript below analysis threshold".into(),
            }
        };
        let analysis_json = analysis
            .available()
            .and_then(|a| serde_json::to_string(a).ok());

        let outcome = if !disposition.is_empty() {
            disposition
        } else if !ended_reason.is_empty() {
            ended_reason
        } else {
            "ended"
        };
        self.store.update_call_outcome(
            call_id,
            outcome,
            Some(duration_secs),
            Some(disposition),
            Some(transcript),
            analysis_json.as_deref(),
        )?;

        let unanswered_shape = matches!(disposition, "no-answer" | "busy" | "voicemail" | "failed");
        let answered =
            disposition == "answered" || (duration_secs >= ANSWERED_MIN_SECS && !unanswered_shape);
        if answered {
            self.store.mark_answered_call(enrollment.id.as_str())?;
        }

        if appointment_booked {
            self.mark_booked(&enrollment)?;
        }

        if let Some(a) = analysis.available() {
            self.apply_analysis(&enrollment, a).await?;
            if a.intent == Intent::Stop {
                self.store.manual_stop(enrollment.id.as_str())?;
            }
        }

        // Failed call shapes feed the healing path.
        let failure = match (disposition, ended_reason) {
            ("no-answer", _) | ("busy", _) | ("voicemail", _) => Some(FailureType::NoAnswer),
            ("failed", _) | (_, "failed") => Some(FailureType::CallFailed),
            _ => None,
        };
        if let Some(failure_type) = failure {
            self.bus
                .enqueue(
                    QueueName::Healing,
                    &HealingJob {
                        enrollment_id: enrollment.id.as_str().to_string(),
                        step_order: enrollment.current_step_order,
                        channel: Channel::Voice,
                        failure_type,
                        detail: format!("disposition={disposition} ended_reason={ended_reason}"),
                        context: Default::default(),
                    },
                    5,
                    0,
                )
                .await?;
        }

        self.memory.invalidate(enrollment.id.as_str());
        Ok(())
    }

    // ── Inbound SMS ───────────────────────────────────────────────────────

    async fn on_sms_reply(
        &self,
        provider_id: &str,
        from_phone: &str,
        body: &str,
        enrollment_id: Option<&str>,
    ) -> Result<()> {
        let enrollment = match enrollment_id {
            Some(id) => self.store.enrollment(id)?,
            None => self.store.live_enrollment_for_phone(from_phone)?,
        };
        let Some(enrollment) = enrollment else {
            warn!(from_phone, "inbound sms with no matching enrollment, dropping");
            return Ok(());
        };

        let lock = self.lock_for(enrollment.id.as_str());
        let _guard = lock.lock().await;

        let recorded = self.store.record_interaction(&NewInteraction {
            tenant_id: enrollment.tenant_id.as_str().to_string(),
            contact_id: enrollment.contact_id.as_str().to_string(),
            enrollment_id: Some(enrollment.id.as_str().to_string()),
            channel: Channel::Sms.to_string(),
            direction: "inbound".into(),
            content: body.to_string(),
            provider_id: Some(provider_id.to_string()),
            event_type: Some("sms-reply".into()),
            ..Default::default()
        })?;
        if !recorded {
            debug!(provider_id, "sms reply replay, no-op");
            return Ok(());
        }

        // Analyze against the context as it stood before this reply.
        let context = self
            .memory
            .build(enrollment.id.as_str(), enrollment.contact_id.as_str());
        let outcome = self
            .analyzer
            .analyze_inbound(body, Channel::Sms, &context)
            .await;

        if let Some(analysis) = outcome.available() {
            let sentiment = Sentiment::from_analysis(analysis);
            self.store.update_interaction_analysis(
                provider_id,
                "sms-reply",
                &sentiment.to_string(),
                &analysis.intent.to_string(),
                &serde_json::to_string(
                    &analysis
                        .objections
                        .iter()
                        .map(|o| format!("{}: {}", o.kind, o.detail))
                        .collect::<Vec<_>>(),
                )?,
                "[]",
                &serde_json::to_string(analysis)?,
            )?;

            self.apply_analysis(&enrollment, analysis).await?;

            if analysis.intent == Intent::Stop {
                info!(enrollment_id = %enrollment.id, "stop intent, halting sequence");
                self.store.manual_stop(enrollment.id.as_str())?;
            }
        }

        // Reply bookkeeping: flag, stop-on-reply, attribution.
        let stop_on_reply = self
            .store
            .sequence(&enrollment.sequence_id)?
            .map(|s| s.stop_on_reply)
            .unwrap_or(false);
        self.store.mark_replied(enrollment.id.as_str(), stop_on_reply)?;
        self.store
            .mark_mutation_result(enrollment.id.as_str(), true, false)?;
        if let Some(variant_id) = enrollment
            .selected_variants
            .get(&enrollment.current_step_order.to_string())
        {
            self.store.record_variant_reply(variant_id)?;
        }

        self.memory.invalidate(enrollment.id.as_str());
        Ok(())
    }

    // ── Delivery reports and email engagement ─────────────────────────────

    async fn on_sms_delivery(
        &self,
        provider_id: &str,
        status: &str,
        enrollment_id: Option<&str>,
        step_order: Option<u32>,
    ) -> Result<()> {
        self.store.update_interaction_outcome(provider_id, status)?;
        if matches!(status, "undelivered" | "failed") {
            let enrollment_id = match enrollment_id {
                Some(id) => Some(id.to_string()),
                None => self
                    .store
                    .interaction_by_provider_id(provider_id)?
                    .and_then(|i| i.enrollment_id.map(|e| e.as_str().to_string())),
            };
            let Some(enrollment_id) = enrollment_id else {
                warn!(provider_id, "undelivered sms with no enrollment, dropping");
                return Ok(());
            };
            self.bus
                .enqueue(
                    QueueName::Healing,
                    &HealingJob {
                        enrollment_id,
                        step_order: step_order.unwrap_or(0),
                        channel: Channel::Sms,
                        failure_type: FailureType::DeliveryFailed,
                        detail: format!("delivery status {status}"),
                        context: Default::default(),
                    },
                    5,
                    0,
                )
                .await?;
        }
        Ok(())
    }

    async fn on_email_engagement(
        &self,
        provider_id: &str,
        event_type: &str,
        tenant_id: Option<&str>,
        enrollment_id: Option<&str>,
    ) -> Result<()> {
        let source = match enrollment_id {
            Some(id) => self.store.enrollment(id)?,
            None => self
                .store
                .interaction_by_provider_id(provider_id)?
                .and_then(|i| i.enrollment_id)
                .map(|eid| self.store.enrollment(eid.as_str()))
                .transpose()?
                .flatten(),
        };
        let Some(enrollment) = source else {
            debug!(provider_id, event_type, "email engagement without enrollment, ignoring");
            return Ok(());
        };

        let recorded = self.store.record_interaction(&NewInteraction {
            tenant_id: tenant_id
                .map(String::from)
                .unwrap_or_else(|| enrollment.tenant_id.as_str().to_string()),
            contact_id: enrollment.contact_id.as_str().to_string(),
            enrollment_id: Some(enrollment.id.as_str().to_string()),
            channel: Channel::Email.to_string(),
            direction: "inbound".into(),
            content: String::new(),
            outcome: Some(event_type.trim_start_matches("email-").to_string()),
            provider_id: Some(provider_id.to_string()),
            event_type: Some(event_type.to_string()),
            ..Default::default()
        })?;
        if recorded {
            self.memory.invalidate(enrollment.id.as_str());
        }
        Ok(())
    }

    async fn on_email_bounced(
        &self,
        provider_id: &str,
        enrollment_id: Option<&str>,
        step_order: Option<u32>,
    ) -> Result<()> {
        self.store.update_interaction_outcome(provider_id, "bounced")?;
        let enrollment_id = match enrollment_id {
            Some(id) => Some(id.to_string()),
            None => self
                .store
                .interaction_by_provider_id(provider_id)?
                .and_then(|i| i.enrollment_id.map(|e| e.as_str().to_string())),
        };
        let Some(enrollment_id) = enrollment_id else {
            warn!(provider_id, "bounce with no enrollment, dropping");
            return Ok(());
        };
        self.bus
            .enqueue(
                QueueName::Healing,
                &HealingJob {
                    enrollment_id,
                    step_order: step_order.unwrap_or(0),
                    channel: Channel::Email,
                    failure_type: FailureType::Bounced,
                    detail: "email bounced".into(),
                    context: Default::default(),
                },
                5,
                0,
            )
            .await?;
        Ok(())
    }

    // ── Shared state mutation ─────────────────────────────────────────────

    /// Booking shortcut: idempotent terminal `booked`, plus conversion
    /// attribution for the variant and mutation that drove it.
    fn mark_booked(&self, enrollment: &Enrollment) -> Result<()> {
        info!(enrollment_id = %enrollment.id, "appointment booked");
        self.store.mark_booked(enrollment.id.as_str())?;
        self.store
            .mark_mutation_result(enrollment.id.as_str(), false, true)?;
        if let Some(variant_id) = enrollment
            .selected_variants
            .get(&enrollment.current_step_order.to_string())
        {
            self.store.record_variant_conversion(variant_id)?;
        }
        self.store.notify(&Notification {
            tenant_id: enrollment.tenant_id.as_str().to_string(),
            enrollment_id: Some(enrollment.id.as_str().to_string()),
            contact_id: Some(enrollment.contact_id.as_str().to_string()),
            kind: "appointment_booked".into(),
            severity: None,
            payload: serde_json::json!({}),
        })?;
        Ok(())
    }

    /// Fold a fresh analysis into the enrollment's cached state, the
    /// contact's engagement, and the notification stream.
    async fn apply_analysis(
        &self,
        enrollment: &Enrollment,
        analysis: &EmotionalAnalysis,
    ) -> Result<()> {
        let enrollment_id = enrollment.id.as_str();

        let recent = self.store.recent_interactions(enrollment_id, RECENT_WINDOW)?;
        let engagement = compute_engagement(&recent, Utc::now());
        let sentiments: Vec<Sentiment> = recent
            .iter()
            .filter_map(|i| i.sentiment.as_deref().and_then(|s| s.parse().ok()))
            .collect();
        let trend = compute_trend(&sentiments);

        let state = updated_state(analysis, trend, engagement);
        self.store.update_emotional_state(enrollment_id, &state)?;
        self.store
            .update_contact_engagement(enrollment.contact_id.as_str(), engagement, trend)?;

        if analysis.needs_human_intervention {
            self.store.set_needs_human(enrollment_id, true)?;
        }

        self.emit_notifications(enrollment, analysis)?;
        Ok(())
    }

    fn emit_notifications(
        &self,
        enrollment: &Enrollment,
        analysis: &EmotionalAnalysis,
    ) -> Result<()> {
        let base = |kind: &str, severity: Option<&str>, payload: serde_json::Value| Notification {
            tenant_id: enrollment.tenant_id.as_str().to_string(),
            enrollment_id: Some(enrollment.id.as_str().to_string()),
            contact_id: Some(enrollment.contact_id.as_str().to_string()),
            kind: kind.to_string(),
            severity: severity.map(String::from),
            payload,
        };

        if analysis.is_hot_lead {
            self.store.notify(&base(
                "hot_lead",
                None,
                serde_json::json!({ "urgency": analysis.urgency_level }),
            ))?;
        }
        if analysis.needs_human_intervention {
            self.store.notify(&base(
                "needs_human",
                Some("high"),
                serde_json::json!({ "emotion": analysis.primary_emotion }),
            ))?;
        }
        for objection in &analysis.objections {
            if objection.severity == ObjectionSeverity::Strong {
                self.store.notify(&base(
                    "objection_detected",
                    Some("strong"),
                    serde_json::json!({ "type": objection.kind, "detail": objection.detail }),
                ))?;
            }
        }
        if analysis.is_at_risk {
            self.store.notify(&base("at_risk", None, serde_json::json!({})))?;
        }
        Ok(())
    }

    fn lock_for(&self, enrollment_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(enrollment_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
