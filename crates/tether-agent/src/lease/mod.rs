//! Plan lease registry: single-owner leases over long-running plans.
//!
//! Several process instances share one [`KeyValueStore`](tether_core::traits::KeyValueStore).
//! Each plan is owned by exactly one executor id at a time; the owner keeps
//! the lease alive with heartbeats, a silent owner is first paused and then
//! opened for takeover, and a takeover atomically rotates the executor id so
//! the old owner's next heartbeat tells it to abort.

pub mod keeper;
pub mod plan;
pub mod registry;

pub use keeper::{KeeperExit, LeaseKeeper};
pub use plan::{HeartbeatAck, Plan, PlanStatus, StallReport, TakeoverOutcome};
pub use registry::PlanLeaseRegistry;

/// Heartbeat interval assigned at registration.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Lower edge of the heartbeat band.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 15_000;
/// Upper edge of the heartbeat band.
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 180_000;

/// Silence after which an executing plan is paused.
pub const PAUSE_AFTER_SECS: i64 = 60;
/// Silence after which another instance may take the plan over.
pub const TAKEOVER_AFTER_SECS: i64 = 120;
/// Age after which a plan is swept regardless of status.
pub const PLAN_TTL_SECS: i64 = 5 * 60;

/// Clamp a requested heartbeat interval into the allowed band.
pub fn clamp_heartbeat_interval(requested_ms: u64) -> u64 {
    requested_ms.clamp(MIN_HEARTBEAT_INTERVAL_MS, MAX_HEARTBEAT_INTERVAL_MS)
}
