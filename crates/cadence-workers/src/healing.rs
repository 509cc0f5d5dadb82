//! Healing worker: drains the healing queue into the self-healer and
//! enqueues any substitute dispatch the decision calls for.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use cadence_adapt::{HealingAction, SelfHealer};
use cadence_bus::{HealingJob, JobBus, JobEnvelope, QueueName, SmsJob};
use cadence_store::Store;

use crate::error::Result;

const IDLE_POLL: Duration = Duration::from_millis(750);

pub struct HealingWorker {
    store: Arc<Store>,
    bus: JobBus,
    healer: SelfHealer,
}

impl HealingWorker {
    pub fn new(store: Arc<Store>, bus: JobBus, healer: SelfHealer) -> Self {
        Self { store, bus, healer }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("healing worker started");
        loop {
            tokio::select! {
                result = self.bus.pop::<HealingJob>(QueueName::Healing) => {
                    match result {
                        Ok(Some(envelope)) => {
                            if let Err(e) = self.handle(envelope).await {
                                error!(error = %e, "healing job failed");
                            }
                            continue;
                        }
                        Ok(None) => tokio::time::sleep(IDLE_POLL).await,
                        Err(e) => {
                            error!(error = %e, "healing queue pop failed");
                            tokio::time::sleep(IDLE_POLL).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("healing worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&self, envelope: JobEnvelope<HealingJob>) -> Result<()> {
        let job = &envelope.payload;

        let Some(enrollment) = self.store.enrollment(&job.enrollment_id)? else {
            warn!(enrollment_id = %job.enrollment_id, "healing for unknown enrollment, dropping");
            return Ok(());
        };
        if enrollment.status.is_terminal() {
            // A terminal enrollment needs no healing.
            return Ok(());
        }
        let Some(contact) = self.store.contact(enrollment.contact_id.as_str())? else {
            warn!(enrollment_id = %job.enrollment_id, "healing for unknown contact, dropping");
            return Ok(());
        };

        let decision = self
            .healer
            .handle_failure(
                &enrollment,
                &contact,
                job.step_order,
                job.channel,
                job.failure_type,
                &job.detail,
            )
            .await?;

        // The only decision with a dispatch side: substitute the failed
        // step with a plain SMS right away.
        if let HealingAction::FallbackSms { body } = decision.action {
            let phone = contact.phone.clone().unwrap_or_default();
            if phone.is_empty() {
                warn!(enrollment_id = %job.enrollment_id, "fallback sms without phone, skipping");
                return Ok(());
            }
            self.bus
                .enqueue(
                    QueueName::Sms,
                    &SmsJob {
                        tenant_id: enrollment.tenant_id.as_str().to_string(),
                        enrollment_id: job.enrollment_id.clone(),
                        step_id: format!("healing-fallback-{}", job.step_order),
                        step_order: job.step_order,
                        contact_id: contact.id.as_str().to_string(),
                        phone,
                        body,
                        retry: 0,
                    },
                    5,
                    0,
                )
                .await?;
            info!(enrollment_id = %job.enrollment_id, "fallback sms enqueued");
        }
        Ok(())
    }
}
