use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tether_core::cancel::RunCancellation;
use tether_core::types::ThreadId;

use super::registry::PlanLeaseRegistry;
use super::{clamp_heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL_MS};

/// Why a [`LeaseKeeper`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperExit {
    /// The run it was attached to was cancelled.
    Cancelled,
    /// A heartbeat was rejected; the run was cancelled as a result.
    LostOwnership,
}

/// Background heartbeat for a plan owned by the current process.
///
/// Beats at a fixed interval until the attached run is cancelled. If the
/// registry rejects a beat, another instance owns the plan now, so the keeper
/// fires the run's cancellation and exits. Cancelling the run does not
/// release the plan.
pub struct LeaseKeeper {
    registry: Arc<PlanLeaseRegistry>,
    thread_id: ThreadId,
    plan_id: String,
    executor_id: String,
    interval_ms: u64,
}

impl LeaseKeeper {
    pub fn new(
        registry: Arc<PlanLeaseRegistry>,
        thread_id: ThreadId,
        plan_id: impl Into<String>,
        executor_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            thread_id,
            plan_id: plan_id.into(),
            executor_id: executor_id.into(),
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }

    /// Beat every `interval`, clamped into the heartbeat band.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = clamp_heartbeat_interval(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Run the heartbeat loop. Blocks until cancelled or ownership is lost.
    pub async fn run(self, cancel: RunCancellation) -> KeeperExit {
        let interval = Duration::from_millis(self.interval_ms);
        info!(
            thread_id = %self.thread_id,
            plan_id = %self.plan_id,
            executor_id = %self.executor_id,
            interval_ms = self.interval_ms,
            "Lease keeper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    info!(plan_id = %self.plan_id, "Lease keeper stopped");
                    return KeeperExit::Cancelled;
                }
            }

            match self
                .registry
                .send_heartbeat(
                    &self.thread_id,
                    &self.plan_id,
                    &self.executor_id,
                    Some(self.interval_ms),
                )
                .await
            {
                Ok(ack) if ack.should_abort => {
                    warn!(
                        thread_id = %self.thread_id,
                        plan_id = %self.plan_id,
                        executor_id = %self.executor_id,
                        "Lease lost, cancelling run"
                    );
                    cancel.cancel();
                    return KeeperExit::LostOwnership;
                }
                Ok(ack) => {
                    debug!(
                        plan_id = %self.plan_id,
                        next_due = ?ack.next_heartbeat_due,
                        "Lease renewed"
                    );
                }
                Err(e) => {
                    // Transient store failure; the next beat may still land in time.
                    warn!(plan_id = %self.plan_id, error = %e, "Heartbeat failed");
                }
            }
        }
    }
}
