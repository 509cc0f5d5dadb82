//! The voice-call worker: drain the priority queue, acquire an umbrella
//! slot, place the call, persist the execution record. The slot is released
//! by the end-of-call webhook, never here (except when call initiation
//! itself fails).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use cadence_bus::{HealingJob, JobBus, JobEnvelope, QueueName, VoiceJob};
use cadence_core::types::{Channel, FailureType, StepContent};
use cadence_store::types::{ExecutionRecord, NewInteraction};
use cadence_store::Store;
use cadence_umbrella::{AcquireOutcome, SlotLedger, UmbrellaCoordinator, UmbrellaResolver};

use crate::error::Result;
use crate::providers::{CallMetadata, VoiceProvider};

/// Queue poll cadence when idle.
const IDLE_POLL: Duration = Duration::from_millis(750);
/// Voice jobs hold a lock lease; an unacked job past this is considered
/// failed and redelivered (handlers dedupe on the attempt marker).
const LOCK_LEASE_SECS: u64 = 60;

pub struct VoiceWorker {
    store: Arc<Store>,
    bus: JobBus,
    resolver: Arc<UmbrellaResolver>,
    coordinator: UmbrellaCoordinator,
    ledger: Arc<SlotLedger>,
    provider: Arc<VoiceProvider>,
    retry_delay_ms: u64,
    max_retries: u32,
}

impl VoiceWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        bus: JobBus,
        resolver: Arc<UmbrellaResolver>,
        coordinator: UmbrellaCoordinator,
        ledger: Arc<SlotLedger>,
        provider: Arc<VoiceProvider>,
        retry_delay_ms: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            bus,
            resolver,
            coordinator,
            ledger,
            provider,
            retry_delay_ms,
            max_retries,
        }
    }

    /// Consumer loop: pop under a lock lease, handle, ack. `worker_id`
    /// only labels logs.
    pub async fn run(self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id, "voice worker started");
        loop {
            tokio::select! {
                result = self.bus.pop_leased::<VoiceJob>(QueueName::Voice, LOCK_LEASE_SECS) => {
                    match result {
                        Ok(Some(delivery)) => {
                            if let Err(e) = self.handle(&delivery.envelope).await {
                                error!(worker_id, error = %e, "voice job failed");
                            }
                            // Ack regardless: every failure path above has
                            // already re-enqueued, healed, or recorded the
                            // job. Only a crash leaves the lease to expire.
                            if let Err(e) = self.bus.ack(QueueName::Voice, &delivery).await {
                                error!(worker_id, error = %e, "voice job ack failed");
                            }
                            continue;
                        }
                        Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                        Err(e) => {
                            error!(worker_id, error = %e, "voice queue pop failed");
                            tokio::time::sleep(IDLE_POLL).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id, "voice worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, envelope: &JobEnvelope<VoiceJob>) -> Result<()> {
        let job = &envelope.payload;

        // 1. Resolve the tenant's umbrella (cached).
        let Some(assignment) = self.resolver.resolve(&job.tenant_id)? else {
            warn!(tenant_id = %job.tenant_id, "no umbrella assignment, dropping voice job");
            self.store.log_execution(&ExecutionRecord {
                tenant_id: job.tenant_id.clone(),
                enrollment_id: Some(job.enrollment_id.clone()),
                step_order: Some(job.step_order),
                action: "skipped_no_umbrella".into(),
                status: "unassigned".into(),
                provider_call_id: None,
                detail: None,
            })?;
            return Ok(());
        };
        let umbrella_id = assignment.umbrella_id.as_str();

        // 2. Slot acquisition under the umbrella limit and tenant cap.
        let outcome = self
            .coordinator
            .try_acquire(
                umbrella_id,
                &job.tenant_id,
                assignment.concurrency_limit,
                assignment.tenant_cap,
            )
            .await?;

        if !outcome.is_acquired() {
            return self.reject(envelope, outcome).await;
        }

        // Lease redelivery dedupe: one initiation attempt per (job, retry).
        // A redelivered job whose first delivery already got this far gives
        // the fresh slot straight back.
        let attempt_marker = format!("{}#{}", envelope.id, job.retry);
        if !self
            .store
            .try_mark_once(&job.tenant_id, &attempt_marker, "voice_attempt")?
        {
            warn!(job_id = %envelope.id, "duplicate voice delivery, dropping");
            self.coordinator.release(umbrella_id, &job.tenant_id).await?;
            return Ok(());
        }
        self.ledger
            .hold(&envelope.id, umbrella_id, &job.tenant_id);

        // 3. Place the call.
        let StepContent::Voice {
            first_message,
            system_prompt,
            assistant_id,
            overrides,
        } = &job.content
        else {
            // Malformed payload; give the slot back and drop.
            self.coordinator.release(umbrella_id, &job.tenant_id).await?;
            self.ledger.forget(&envelope.id);
            error!(job_id = %envelope.id, "voice job carried non-voice content");
            return Ok(());
        };

        let metadata = CallMetadata {
            tenant_id: job.tenant_id.clone(),
            umbrella_id: umbrella_id.to_string(),
            enrollment_id: job.enrollment_id.clone(),
            step_id: job.step_id.clone(),
        };

        match self
            .provider
            .initiate_call(
                &assignment.provider_api_key,
                &job.phone,
                first_message,
                system_prompt,
                assistant_id.as_deref(),
                overrides.as_ref(),
                &metadata,
            )
            .await
        {
            Ok(call_id) => {
                self.ledger.rekey(&envelope.id, &call_id);
                self.store.log_execution(&ExecutionRecord {
                    tenant_id: job.tenant_id.clone(),
                    enrollment_id: Some(job.enrollment_id.clone()),
                    step_order: Some(job.step_order),
                    action: "call_initiated".into(),
                    status: "ok".into(),
                    provider_call_id: Some(call_id.clone()),
                    detail: None,
                })?;
                // Outbound interaction; the event processor enriches it when
                // the outcome webhook lands.
                self.store.record_interaction(&NewInteraction {
                    tenant_id: job.tenant_id.clone(),
                    contact_id: job.contact_id.clone(),
                    enrollment_id: Some(job.enrollment_id.clone()),
                    channel: Channel::Voice.to_string(),
                    direction: "outbound".into(),
                    content: first_message.clone(),
                    outcome: Some("delivered".into()),
                    provider_id: Some(call_id.clone()),
                    event_type: Some("call-initiated".into()),
                    ..Default::default()
                })?;
                info!(call_id = %call_id, enrollment_id = %job.enrollment_id, "call initiated");
                // 4. The slot stays held until the end-of-call webhook.
            }
            Err(e) => {
                // Initiation failed: the call never existed, so the slot
                // goes straight back.
                self.coordinator.release(umbrella_id, &job.tenant_id).await?;
                self.ledger.forget(&envelope.id);
                self.store.log_execution(&ExecutionRecord {
                    tenant_id: job.tenant_id.clone(),
                    enrollment_id: Some(job.enrollment_id.clone()),
                    step_order: Some(job.step_order),
                    action: "call_initiation_failed".into(),
                    status: "error".into(),
                    provider_call_id: None,
                    detail: Some(e.to_string()),
                })?;
                let failure_type = if e.is_permanent() {
                    FailureType::ProviderRejected
                } else {
                    FailureType::CallFailed
                };
                self.bus
                    .enqueue(
                        QueueName::Healing,
                        &HealingJob {
                            enrollment_id: job.enrollment_id.clone(),
                            step_order: job.step_order,
                            channel: Channel::Voice,
                            failure_type,
                            detail: e.to_string(),
                            context: Default::default(),
                        },
                        5,
                        0,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Capacity rejection: re-enqueue with linear backoff, preserving
    /// priority; after the retry ceiling, record and drop.
    async fn reject(
        &self,
        envelope: &JobEnvelope<VoiceJob>,
        outcome: AcquireOutcome,
    ) -> Result<()> {
        let job = &envelope.payload;
        if job.retry >= self.max_retries {
            warn!(enrollment_id = %job.enrollment_id, retries = job.retry,
                  "capacity retries exhausted, dropping voice job");
            self.store.log_execution(&ExecutionRecord {
                tenant_id: job.tenant_id.clone(),
                enrollment_id: Some(job.enrollment_id.clone()),
                step_order: Some(job.step_order),
                action: "skipped_capacity".into(),
                status: "capacity_exhausted".into(),
                provider_call_id: None,
                detail: Some(outcome.to_string()),
            })?;
            return Ok(());
        }

        let delay_secs = (self.retry_delay_ms / 1000) * (job.retry as u64 + 1);
        info!(enrollment_id = %job.enrollment_id, %outcome, retry = job.retry + 1,
              delay_secs, "capacity rejection, re-enqueueing");

        let bumped = JobEnvelope {
            id: envelope.id.clone(),
            priority: envelope.priority,
            attempt: envelope.attempt,
            enqueued_at: envelope.enqueued_at.clone(),
            payload: VoiceJob {
                retry: job.retry + 1,
                ..job.clone()
            },
        };
        self.bus
            .re_enqueue(QueueName::Voice, &bumped, delay_secs)
            .await?;
        Ok(())
    }
}
