//! SMS worker: no slot gating, just send, record, and retry with
//! exponential backoff up to the per-channel ceiling. Permanent provider
//! rejections skip the retries and go straight to the healer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use cadence_bus::{HealingJob, JobBus, JobEnvelope, QueueName, SmsJob};
use cadence_core::types::{Channel, FailureType};
use cadence_store::types::NewInteraction;
use cadence_store::Store;

use crate::error::Result;
use crate::providers::SmsProvider;

const IDLE_POLL: Duration = Duration::from_millis(750);
/// Exponential backoff base for transient provider errors.
const RETRY_BASE_SECS: u64 = 5;
/// Send attempts before the failure is handed to the healer.
const MAX_SEND_ATTEMPTS: u32 = 5;

pub struct SmsWorker {
    store: Arc<Store>,
    bus: JobBus,
    provider: Arc<SmsProvider>,
}

impl SmsWorker {
    pub fn new(store: Arc<Store>, bus: JobBus, provider: Arc<SmsProvider>) -> Self {
        Self {
            store,
            bus,
            provider,
        }
    }

    pub async fn run(self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id, "sms worker started");
        loop {
            tokio::select! {
                result = self.bus.pop::<SmsJob>(QueueName::Sms) => {
                    match result {
                        Ok(Some(envelope)) => {
                            if let Err(e) = self.handle(envelope).await {
                                error!(worker_id, error = %e, "sms job failed");
                            }
                            continue;
                        }
                        Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                        Err(e) => {
                            error!(worker_id, error = %e, "sms queue pop failed");
                            tokio::time::sleep(IDLE_POLL).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id, "sms worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, envelope: JobEnvelope<SmsJob>) -> Result<()> {
        let job = &envelope.payload;
        match self
            .provider
            .send(&job.phone, &job.body, &job.enrollment_id, &job.step_id)
            .await
        {
            Ok(message_id) => {
                self.store.record_interaction(&NewInteraction {
                    tenant_id: job.tenant_id.clone(),
                    contact_id: job.contact_id.clone(),
                    enrollment_id: Some(job.enrollment_id.clone()),
                    channel: Channel::Sms.to_string(),
                    direction: "outbound".into(),
                    content: job.body.clone(),
                    outcome: Some("sent".into()),
                    provider_id: Some(message_id.clone()),
                    event_type: Some("sms-sent".into()),
                    ..Default::default()
                })?;
                info!(message_id = %message_id, enrollment_id = %job.enrollment_id, "sms sent");
            }
            Err(e) if e.is_permanent() => {
                warn!(enrollment_id = %job.enrollment_id, error = %e, "permanent sms rejection");
                self.bus
                    .enqueue(
                        QueueName::Healing,
                        &HealingJob {
                            enrollment_id: job.enrollment_id.clone(),
                            step_order: job.step_order,
                            channel: Channel::Sms,
                            failure_type: FailureType::InvalidNumber,
                            detail: e.to_string(),
                            context: Default::default(),
                        },
                        5,
                        0,
                    )
                    .await?;
            }
            Err(e) => {
                if job.retry + 1 >= MAX_SEND_ATTEMPTS {
                    warn!(enrollment_id = %job.enrollment_id, error = %e,
                          "sms retries exhausted, routing to healer");
                    self.bus
                        .enqueue(
                            QueueName::Healing,
                            &HealingJob {
                                enrollment_id: job.enrollment_id.clone(),
                                step_order: job.step_order,
                                channel: Channel::Sms,
                                failure_type: FailureType::DeliveryFailed,
                                detail: e.to_string(),
                                context: Default::default(),
                            },
                            5,
                            0,
                        )
                        .await?;
                } else {
                    let delay = RETRY_BASE_SECS << job.retry;
                    let bumped = JobEnvelope {
                        id: envelope.id.clone(),
                        priority: envelope.priority,
                        attempt: envelope.attempt,
                        enqueued_at: envelope.enqueued_at.clone(),
                        payload: SmsJob {
                            retry: job.retry + 1,
                            ..job.clone()
                        },
                    };
                    warn!(enrollment_id = %job.enrollment_id, error = %e, delay,
                          "transient sms failure, retrying");
                    self.bus.re_enqueue(QueueName::Sms, &bumped, delay).await?;
                }
            }
        }
        Ok(())
    }
}
