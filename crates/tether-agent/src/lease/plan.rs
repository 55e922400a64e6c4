use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tether_core::types::ThreadId;

use super::{DEFAULT_HEARTBEAT_INTERVAL_MS, PAUSE_AFTER_SECS, PLAN_TTL_SECS, TAKEOVER_AFTER_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Paused,
    Completed,
    Failed,
    Abandoned,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Abandoned
        )
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanStatus::Planning => "planning",
            PlanStatus::Executing => "executing",
            PlanStatus::Paused => "paused",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// A lease record, keyed by `(thread_id, plan_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub thread_id: ThreadId,
    pub plan_id: String,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// The only instance allowed to mutate this plan.
    pub executor_id: String,
    pub status: PlanStatus,
    #[serde(default)]
    pub heartbeat_count: u64,
    #[serde(default)]
    pub takeover_allowed: bool,
    pub next_heartbeat_due: DateTime<Utc>,
    pub current_heartbeat_interval_ms: u64,
}

impl Plan {
    pub(crate) fn new(
        thread_id: ThreadId,
        plan_id: String,
        goal: String,
        executor_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            thread_id,
            plan_id,
            goal,
            skill_slug: None,
            skill_title: None,
            started_at: now,
            last_heartbeat: now,
            executor_id,
            status: PlanStatus::Planning,
            heartbeat_count: 0,
            takeover_allowed: false,
            next_heartbeat_due: now + interval(DEFAULT_HEARTBEAT_INTERVAL_MS),
            current_heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }

    /// Time since the owner was last heard from.
    pub fn silence(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_heartbeat
    }

    pub fn should_pause(&self, now: DateTime<Utc>) -> bool {
        self.status == PlanStatus::Executing
            && self.silence(now) > Duration::seconds(PAUSE_AFTER_SECS)
    }

    pub fn should_open_takeover(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, PlanStatus::Executing | PlanStatus::Paused)
            && self.silence(now) > Duration::seconds(TAKEOVER_AFTER_SECS)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at > Duration::seconds(PLAN_TTL_SECS)
    }
}

pub(crate) fn interval(ms: u64) -> Duration {
    Duration::milliseconds(ms as i64)
}

/// Answer to a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub accepted: bool,
    pub still_owner: bool,
    /// The caller no longer owns the plan and must stop working on it.
    pub should_abort: bool,
    pub next_heartbeat_due: Option<DateTime<Utc>>,
}

impl HeartbeatAck {
    pub(crate) fn rejected() -> Self {
        Self {
            accepted: false,
            still_owner: false,
            should_abort: true,
            next_heartbeat_due: None,
        }
    }

    pub(crate) fn accepted(next_heartbeat_due: DateTime<Utc>) -> Self {
        Self {
            accepted: true,
            still_owner: true,
            should_abort: false,
            next_heartbeat_due: Some(next_heartbeat_due),
        }
    }
}

/// Plan ids touched by one stall sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StallReport {
    /// Plans moved from executing to paused by this sweep.
    pub paused: Vec<String>,
    /// Plans currently open for takeover.
    pub takeover_available: Vec<String>,
}

impl StallReport {
    pub fn is_empty(&self) -> bool {
        self.paused.is_empty() && self.takeover_available.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverOutcome {
    pub success: bool,
    pub new_executor_id: Option<String>,
    pub previous_executor_id: Option<String>,
}

impl TakeoverOutcome {
    pub(crate) fn refused(previous_executor_id: Option<String>) -> Self {
        Self {
            success: false,
            new_executor_id: None,
            previous_executor_id,
        }
    }
}
