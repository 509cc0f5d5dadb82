use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cadence_adapt::Mutator;
use cadence_bus::JobBus;
use cadence_memory::ConversationMemory;
use cadence_store::Store;

use crate::error::Result;

/// Core scheduler: polls the durable store for due enrollments and drives
/// each through the dispatch pipeline.
pub struct SchedulerEngine {
    pub(crate) store: Arc<Store>,
    pub(crate) bus: JobBus,
    pub(crate) memory: Arc<ConversationMemory>,
    pub(crate) mutator: Mutator,
    poll_interval: Duration,
    batch_size: u32,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<Store>,
        bus: JobBus,
        memory: Arc<ConversationMemory>,
        mutator: Mutator,
        poll_interval_ms: u64,
        batch_size: u32,
    ) -> Self {
        Self {
            store,
            bus,
            memory,
            mutator,
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch_size,
        }
    }

    /// Main loop. Ticks every poll interval until `shutdown` broadcasts
    /// `true`. Enrollments are processed sequentially within a tick; a tick
    /// overrunning the interval logs a backpressure warning instead of
    /// fanning out.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = Instant::now();
                    match self.tick().await {
                        Ok(processed) if processed > 0 => {
                            info!(processed, elapsed_ms = started.elapsed().as_millis() as u64, "tick complete");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "scheduler tick failed"),
                    }
                    if started.elapsed() > self.poll_interval {
                        warn!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            interval_ms = self.poll_interval.as_millis() as u64,
                            "tick overran the poll interval (backpressure)"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One tick: fetch the due batch and process each enrollment in
    /// isolation. Returns how many were picked up.
    pub async fn tick(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self
            .store
            .due_enrollments(&now.to_rfc3339(), self.batch_size)?;
        let count = due.len();

        for enrollment in due {
            let id = enrollment.id.clone();
            if let Err(e) = self.process_enrollment(enrollment, now).await {
                // One bad enrollment must not poison the batch.
                error!(enrollment_id = %id, error = %e, "enrollment processing failed");
            }
        }
        Ok(count)
    }
}
