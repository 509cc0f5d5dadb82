//! Email worker — same consumer shape as SMS, bounce handling via the
//! event processor rather than the send path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use cadence_bus::{EmailJob, HealingJob, JobBus, JobEnvelope, QueueName};
use cadence_core::types::{Channel, FailureType};
use cadence_store::types::NewInteraction;
use cadence_store::Store;

use crate::error::Result;
use crate::providers::EmailProvider;

const IDLE_POLL: Duration = Duration::from_millis(750);
const RETRY_BASE_SECS: u64 = 10;
const MAX_SEND_ATTEMPTS: u32 = 4;

pub struct EmailWorker {
    store: Arc<Store>,
    bus: JobBus,
    provider: Arc<EmailProvider>,
}

impl EmailWorker {
    pub fn new(store: Arc<Store>, bus: JobBus, provider: Arc<EmailProvider>) -> Self {
        Self {
            store,
            bus,
            provider,
        }
    }

    pub async fn run(self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id, "email worker started");
        loop {
            tokio::select! {
                result = self.bus.pop::<EmailJob>(QueueName::Email) => {
                    match result {
                        Ok(Some(envelope)) => {
                            if let Err(e) = self.handle(envelope).await {
                                error!(worker_id, error = %e, "email job failed");
                            }
                            continue;
                        }
                        Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                        Err(e) => {
                            error!(worker_id, error = %e, "email queue pop failed");
                            tokio::time::sleep(IDLE_POLL).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id, "email worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, envelope: JobEnvelope<EmailJob>) -> Result<()> {
        let job = &envelope.payload;
        match self
            .provider
            .send(
                &job.to_address,
                &job.subject,
                &job.html,
                &job.text,
                &job.enrollment_id,
                &job.step_id,
            )
            .await
        {
            Ok(message_id) => {
                self.store.record_interaction(&NewInteraction {
                    tenant_id: job.tenant_id.clone(),
                    contact_id: job.contact_id.clone(),
                    enrollment_id: Some(job.enrollment_id.clone()),
                    channel: Channel::Email.to_string(),
                    direction: "outbound".into(),
                    content: job.text.clone(),
                    outcome: Some("sent".into()),
                    provider_id: Some(message_id.clone()),
                    event_type: Some("email-sent".into()),
                    ..Default::default()
                })?;
                info!(message_id = %message_id, enrollment_id = %job.enrollment_id, "email sent");
            }
            Err(e) if e.is_permanent() => {
                warn!(enrollment_id = %job.enrollment_id, error = %e, "permanent email rejection");
                self.bus
                    .enqueue(
                        QueueName::Healing,
                        &HealingJob {
                            enrollment_id: job.enrollment_id.clone(),
                            step_order: job.step_order,
                            channel: Channel::Email,
                            failure_type: FailureType::ProviderRejected,
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
                          "email retries exhausted, routing to healer");
                    self.bus
                        .enqueue(
                            QueueName::Healing,
                            &HealingJob {
                                enrollment_id: job.enrollment_id.clone(),
                                step_order: job.step_order,
                                channel: Channel::Email,
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
                        payload: EmailJob {
                            retry: job.retry + 1,
                            ..job.clone()
                        },
                    };
                    warn!(enrollment_id = %job.enrollment_id, error = %e, delay,
                          "transient email failure, retrying");
                    self.bus.re_enqueue(QueueName::Email, &bumped, delay).await?;
                }
            }
        }
        Ok(())
    }
}
