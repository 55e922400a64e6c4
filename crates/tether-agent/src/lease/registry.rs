use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tether_core::error::{Result, TetherError};
use tether_core::event::EventBus;
use tether_core::traits::{Clock, IdGenerator, KeyValueStore};
use tether_core::types::{EngineEvent, ThreadId};

use super::clamp_heartbeat_interval;
use super::plan::{interval, HeartbeatAck, Plan, PlanStatus, StallReport, TakeoverOutcome};

const KEY_PREFIX: &str = "active_plan:";

/// Lease bookkeeping for long-running plans, shared through a key-value store.
///
/// Time and executor ids come from the injected [`Clock`] and [`IdGenerator`].
/// Read-modify-write cycles are serialized within this process; across
/// processes the executor-id check on every mutation is what keeps a
/// superseded owner from writing.
pub struct PlanLeaseRegistry {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    event_bus: Option<Arc<EventBus>>,
    write_lock: Mutex<()>,
}

impl PlanLeaseRegistry {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            kv,
            clock,
            ids,
            event_bus: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn key(thread_id: &ThreadId, plan_id: &str) -> String {
        format!(
            "{}{}",
            Self::thread_prefix(thread_id),
            escape_segment(plan_id)
        )
    }

    fn thread_prefix(thread_id: &ThreadId) -> String {
        format!("{}{}:", KEY_PREFIX, escape_segment(thread_id.as_str()))
    }

    /// Create a plan owned by a fresh executor id and return that id.
    ///
    /// Registering an existing `(thread_id, plan_id)` replaces the record, so
    /// the previous owner's next heartbeat is rejected.
    pub async fn register_plan(
        &self,
        thread_id: &ThreadId,
        plan_id: &str,
        goal: &str,
        skill_slug: Option<&str>,
        skill_title: Option<&str>,
    ) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let executor_id = self.ids.next_id();

        if let Some(existing) = self.load(thread_id, plan_id).await? {
            warn!(
                thread_id = %thread_id,
                plan_id,
                previous_executor_id = %existing.executor_id,
                "Re-registering plan, previous owner superseded"
            );
        }

        let mut plan = Plan::new(
            thread_id.clone(),
            plan_id.to_string(),
            goal.to_string(),
            executor_id.clone(),
            now,
        );
        plan.skill_slug = skill_slug.map(String::from);
        plan.skill_title = skill_title.map(String::from);
        self.store(&plan).await?;

        info!(thread_id = %thread_id, plan_id, executor_id = %executor_id, "Plan registered");
        self.emit(EngineEvent::PlanRegistered {
            thread_id: thread_id.clone(),
            plan_id: plan_id.to_string(),
            executor_id: executor_id.clone(),
        });
        Ok(executor_id)
    }

    /// Renew the lease. Only the current owner is accepted.
    ///
    /// `requested_interval_ms` is the caller's estimate of when it will beat
    /// again; it is clamped into the allowed band.
    pub async fn send_heartbeat(
        &self,
        thread_id: &ThreadId,
        plan_id: &str,
        executor_id: &str,
        requested_interval_ms: Option<u64>,
    ) -> Result<HeartbeatAck> {
        let _guard = self.write_lock.lock().await;

        let mut plan = match self.load(thread_id, plan_id).await? {
            Some(plan) if plan.executor_id == executor_id => plan,
            found => {
                warn!(
                    thread_id = %thread_id,
                    plan_id,
                    executor_id,
                    owner = found.as_ref().map(|p| p.executor_id.as_str()).unwrap_or("<none>"),
                    "Heartbeat rejected"
                );
                self.emit(EngineEvent::HeartbeatRejected {
                    thread_id: thread_id.clone(),
                    plan_id: plan_id.to_string(),
                    executor_id: executor_id.to_string(),
                });
                return Ok(HeartbeatAck::rejected());
            }
        };

        let now = self.clock.now();
        let interval_ms =
            clamp_heartbeat_interval(requested_interval_ms.unwrap_or(plan.current_heartbeat_interval_ms));
        plan.current_heartbeat_interval_ms = interval_ms;
        plan.last_heartbeat = now;
        plan.next_heartbeat_due = now + interval(interval_ms);
        plan.heartbeat_count += 1;
        match plan.status {
            PlanStatus::Planning => plan.status = PlanStatus::Executing,
            PlanStatus::Paused => {
                plan.status = PlanStatus::Executing;
                plan.takeover_allowed = false;
                info!(thread_id = %thread_id, plan_id, "Paused plan resumed by owner");
            }
            _ => {}
        }
        self.store(&plan).await?;

        debug!(
            thread_id = %thread_id,
            plan_id,
            heartbeat_count = plan.heartbeat_count,
            interval_ms,
            "Heartbeat accepted"
        );
        Ok(HeartbeatAck::accepted(plan.next_heartbeat_due))
    }

    /// Pause silent executing plans and open long-silent ones for takeover.
    pub async fn check_for_stalled_plans(&self, thread_id: &ThreadId) -> Result<StallReport> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let mut report = StallReport::default();

        for mut plan in self.scan(thread_id).await? {
            let silent_secs = plan.silence(now).num_seconds();
            let mut changed = false;

            if plan.should_pause(now) {
                plan.status = PlanStatus::Paused;
                changed = true;
                report.paused.push(plan.plan_id.clone());
                warn!(thread_id = %thread_id, plan_id = %plan.plan_id, silent_secs, "Plan paused");
                self.emit(EngineEvent::PlanPaused {
                    thread_id: thread_id.clone(),
                    plan_id: plan.plan_id.clone(),
                    silent_secs,
                });
            }

            if plan.should_open_takeover(now) {
                if !plan.takeover_allowed {
                    plan.takeover_allowed = true;
                    changed = true;
                    warn!(
                        thread_id = %thread_id,
                        plan_id = %plan.plan_id,
                        silent_secs,
                        "Plan open for takeover"
                    );
                    self.emit(EngineEvent::TakeoverAvailable {
                        thread_id: thread_id.clone(),
                        plan_id: plan.plan_id.clone(),
                        silent_secs,
                    });
                }
                report.takeover_available.push(plan.plan_id.clone());
            }

            if changed {
                self.store(&plan).await?;
            }
        }

        Ok(report)
    }

    /// Transfer ownership of a plan that is open for takeover.
    pub async fn attempt_takeover(
        &self,
        thread_id: &ThreadId,
        plan_id: &str,
    ) -> Result<TakeoverOutcome> {
        let _guard = self.write_lock.lock().await;

        let mut plan = match self.load(thread_id, plan_id).await? {
            Some(plan) if plan.takeover_allowed => plan,
            Some(plan) => {
                debug!(thread_id = %thread_id, plan_id, "Takeover refused, plan not eligible");
                return Ok(TakeoverOutcome::refused(Some(plan.executor_id)));
            }
            None => return Ok(TakeoverOutcome::refused(None)),
        };

        let now = self.clock.now();
        let new_executor_id = self.ids.next_id();
        let previous_executor_id = std::mem::replace(&mut plan.executor_id, new_executor_id.clone());
        plan.heartbeat_count = 0;
        plan.status = PlanStatus::Executing;
        plan.takeover_allowed = false;
        plan.last_heartbeat = now;
        plan.next_heartbeat_due = now + interval(plan.current_heartbeat_interval_ms);
        self.store(&plan).await?;

        info!(
            thread_id = %thread_id,
            plan_id,
            previous_executor_id = %previous_executor_id,
            new_executor_id = %new_executor_id,
            "Plan taken over"
        );
        self.emit(EngineEvent::PlanTakenOver {
            thread_id: thread_id.clone(),
            plan_id: plan_id.to_string(),
            previous_executor_id: previous_executor_id.clone(),
            new_executor_id: new_executor_id.clone(),
        });

        Ok(TakeoverOutcome {
            success: true,
            new_executor_id: Some(new_executor_id),
            previous_executor_id: Some(previous_executor_id),
        })
    }

    /// Set the plan's status. Returns `false` if the caller is not the owner.
    pub async fn update_plan_status(
        &self,
        thread_id: &ThreadId,
        plan_id: &str,
        executor_id: &str,
        status: PlanStatus,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut plan = match self.load(thread_id, plan_id).await? {
            Some(plan) if plan.executor_id == executor_id => plan,
            _ => {
                warn!(thread_id = %thread_id, plan_id, executor_id, "Status update rejected");
                return Ok(false);
            }
        };

        plan.status = status;
        if status.is_terminal() {
            plan.takeover_allowed = false;
        }
        self.store(&plan).await?;
        debug!(thread_id = %thread_id, plan_id, status = %status, "Plan status updated");
        Ok(true)
    }

    /// Delete a plan regardless of owner. Returns whether one existed.
    pub async fn remove_plan(&self, thread_id: &ThreadId, plan_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let removed = self.kv.delete(&Self::key(thread_id, plan_id)).await?;
        if removed {
            info!(thread_id = %thread_id, plan_id, "Plan removed");
            self.emit(EngineEvent::PlanRemoved {
                thread_id: thread_id.clone(),
                plan_id: plan_id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Remove every plan older than the TTL, whatever its status.
    pub async fn cleanup_abandoned_plans(&self, thread_id: &ThreadId) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();
        let mut removed = 0;

        for plan in self.scan(thread_id).await? {
            if !plan.is_expired(now) {
                continue;
            }
            if self.kv.delete(&Self::key(thread_id, &plan.plan_id)).await? {
                removed += 1;
                info!(
                    thread_id = %thread_id,
                    plan_id = %plan.plan_id,
                    status = %plan.status,
                    age_secs = (now - plan.started_at).num_seconds(),
                    "Expired plan removed"
                );
                self.emit(EngineEvent::PlanRemoved {
                    thread_id: thread_id.clone(),
                    plan_id: plan.plan_id.clone(),
                });
            }
        }

        Ok(removed)
    }

    /// All plans of a thread, oldest first.
    pub async fn get_active_plans(&self, thread_id: &ThreadId) -> Result<Vec<Plan>> {
        self.scan(thread_id).await
    }

    pub async fn get_plan(&self, thread_id: &ThreadId, plan_id: &str) -> Result<Option<Plan>> {
        self.load(thread_id, plan_id).await
    }

    /// Every plan in the store, grouped by thread.
    pub async fn list_all_plans(&self) -> Result<Vec<Plan>> {
        let entries = self.kv.scan_prefix(KEY_PREFIX).await?;
        let mut plans = decode_plans(entries.into_iter());
        plans.sort_by(|a, b| {
            a.thread_id
                .cmp(&b.thread_id)
                .then(a.started_at.cmp(&b.started_at))
        });
        Ok(plans)
    }

    async fn load(&self, thread_id: &ThreadId, plan_id: &str) -> Result<Option<Plan>> {
        let key = Self::key(thread_id, plan_id);
        let Some(value) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let plan: Plan = serde_json::from_value(value)
            .map_err(|e| TetherError::Store(format!("Corrupt plan record '{}': {}", key, e)))?;
        if &plan.thread_id != thread_id || plan.plan_id != plan_id {
            return Err(TetherError::Store(format!(
                "Plan record '{}' belongs to {}/{}",
                key, plan.thread_id, plan.plan_id
            )));
        }
        Ok(Some(plan))
    }

    async fn scan(&self, thread_id: &ThreadId) -> Result<Vec<Plan>> {
        let entries = self.kv.scan_prefix(&Self::thread_prefix(thread_id)).await?;
        let mut plans = decode_plans(entries.into_iter());
        plans.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(plans)
    }

    async fn store(&self, plan: &Plan) -> Result<()> {
        let value = serde_json::to_value(plan)?;
        self.kv
            .set(&Self::key(&plan.thread_id, &plan.plan_id), value)
            .await
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(event);
        }
    }
}

/// Escape the key separator so `(thread, plan)` maps to exactly one key.
fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace(':', "%3A")
}

fn decode_plans(entries: impl Iterator<Item = (String, serde_json::Value)>) -> Vec<Plan> {
    entries
        .filter_map(|(key, value)| match serde_json::from_value::<Plan>(value) {
            Ok(plan) if key == PlanLeaseRegistry::key(&plan.thread_id, &plan.plan_id) => Some(plan),
            Ok(plan) => {
                warn!(
                    key = %key,
                    thread_id = %plan.thread_id,
                    plan_id = %plan.plan_id,
                    "Skipping plan record stored under a foreign key"
                );
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping corrupt plan record");
                None
            }
        })
        .collect()
}
