use std::sync::Arc;

use chrono::Duration;

use tether_agent::{PlanLeaseRegistry, PlanStatus};
use tether_core::event::EventBus;
use tether_core::traits::Clock;
use tether_core::types::{EngineEvent, ThreadId};
use tether_memory::{InMemoryStore, SqliteKvStore};
use tether_test_utils::{drain_events, ManualClock, SequentialIds};

fn registry() -> (PlanLeaseRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let registry = PlanLeaseRegistry::new(
        Arc::new(InMemoryStore::new()),
        clock.clone(),
        Arc::new(SequentialIds::new("exec")),
    );
    (registry, clock)
}

async fn executing_plan(registry: &PlanLeaseRegistry, thread: &ThreadId, plan_id: &str) -> String {
    let owner = registry
        .register_plan(thread, plan_id, "reconcile invoices", None, None)
        .await
        .unwrap();
    registry
        .update_plan_status(thread, plan_id, &owner, PlanStatus::Executing)
        .await
        .unwrap();
    owner
}

#[tokio::test]
async fn register_then_list_returns_single_owned_plan() {
    let (registry, clock) = registry();
    let thread = ThreadId::from_str("thread-1");

    let executor_id = registry
        .register_plan(&thread, "p1", "reconcile invoices", Some("ledger"), Some("Ledger"))
        .await
        .unwrap();

    let plans = registry.get_active_plans(&thread).await.unwrap();
    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert_eq!(plan.executor_id, executor_id);
    assert_eq!(plan.status, PlanStatus::Planning);
    assert_eq!(plan.started_at, clock.now());
    assert_eq!(plan.last_heartbeat, clock.now());
    assert_eq!(plan.current_heartbeat_interval_ms, 30_000);
    assert_eq!(plan.skill_title.as_deref(), Some("Ledger"));
}

#[tokio::test]
async fn old_owner_is_rejected_after_takeover() {
    let (registry, clock) = registry();
    let thread = ThreadId::from_str("thread-1");
    let old_owner = executing_plan(&registry, &thread, "p1").await;

    clock.advance(Duration::seconds(150));
    registry.check_for_stalled_plans(&thread).await.unwrap();
    let outcome = registry.attempt_takeover(&thread, "p1").await.unwrap();
    assert!(outcome.success);

    let ack = registry
        .send_heartbeat(&thread, "p1", &old_owner, None)
        .await
        .unwrap();
    assert!(!ack.accepted);
    assert!(ack.should_abort);
    assert!(!ack.still_owner);

    assert!(!registry
        .update_plan_status(&thread, "p1", &old_owner, PlanStatus::Completed)
        .await
        .unwrap());
}

#[tokio::test]
async fn takeover_requires_eligibility() {
    let (registry, clock) = registry();
    let thread = ThreadId::from_str("thread-1");
    let owner = executing_plan(&registry, &thread, "p1").await;

    clock.advance(Duration::seconds(90));
    registry.check_for_stalled_plans(&thread).await.unwrap();

    let outcome = registry.attempt_takeover(&thread, "p1").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.new_executor_id, None);

    let plan = registry.get_plan(&thread, "p1").await.unwrap().unwrap();
    assert_eq!(plan.executor_id, owner);
    assert_eq!(plan.status, PlanStatus::Paused);

    let missing = registry.attempt_takeover(&thread, "nope").await.unwrap();
    assert!(!missing.success);
    assert_eq!(missing.previous_executor_id, None);
}

#[tokio::test]
async fn heartbeat_interval_is_clamped() {
    let (registry, _) = registry();
    let thread = ThreadId::from_str("thread-1");
    let owner = executing_plan(&registry, &thread, "p1").await;

    registry
        .send_heartbeat(&thread, "p1", &owner, Some(300_000))
        .await
        .unwrap();
    let plan = registry.get_plan(&thread, "p1").await.unwrap().unwrap();
    assert!(plan.current_heartbeat_interval_ms <= 180_000);

    registry
        .send_heartbeat(&thread, "p1", &owner, Some(1_000))
        .await
        .unwrap();
    let plan = registry.get_plan(&thread, "p1").await.unwrap().unwrap();
    assert!(plan.current_heartbeat_interval_ms >= 15_000);
    assert_eq!(plan.heartbeat_count, 2);
}

#[tokio::test]
async fn stall_detection_thresholds() {
    let (registry, clock) = registry();
    let thread = ThreadId::from_str("thread-1");

    executing_plan(&registry, &thread, "quiet").await;
    clock.advance(Duration::seconds(60));
    let loud = executing_plan(&registry, &thread, "recent").await;
    clock.advance(Duration::seconds(30));
    registry.send_heartbeat(&thread, "recent", &loud, None).await.unwrap();

    // "quiet" silent for 90s, "recent" just beat
    let report = registry.check_for_stalled_plans(&thread).await.unwrap();
    assert_eq!(report.paused, vec!["quiet".to_string()]);
    assert!(report.takeover_available.is_empty());

    clock.advance(Duration::seconds(60));
    // "quiet" silent for 150s, "recent" for 60s
    let report = registry.check_for_stalled_plans(&thread).await.unwrap();
    assert!(report.paused.is_empty());
    assert_eq!(report.takeover_available, vec!["quiet".to_string()]);

    let quiet = registry.get_plan(&thread, "quiet").await.unwrap().unwrap();
    assert_eq!(quiet.status, PlanStatus::Paused);
    assert!(quiet.takeover_allowed);
    let recent = registry.get_plan(&thread, "recent").await.unwrap().unwrap();
    assert_eq!(recent.status, PlanStatus::Executing);
}

#[tokio::test]
async fn long_silence_pauses_and_opens_takeover_in_one_sweep() {
    let (registry, clock) = registry();
    let thread = ThreadId::from_str("thread-1");
    executing_plan(&registry, &thread, "p1").await;

    clock.advance(Duration::seconds(150));
    let report = registry.check_for_stalled_plans(&thread).await.unwrap();

    assert_eq!(report.paused, vec!["p1".to_string()]);
    assert_eq!(report.takeover_available, vec!["p1".to_string()]);
}

#[tokio::test]
async fn ttl_sweep_ignores_status_and_heartbeats() {
    let (registry, clock) = registry();
    let thread = ThreadId::from_str("thread-1");

    let owner = executing_plan(&registry, &thread, "old").await;
    clock.advance(Duration::seconds(200));
    executing_plan(&registry, &thread, "young").await;
    clock.advance(Duration::seconds(101));

    // "old" keeps beating but is still past its TTL
    registry.send_heartbeat(&thread, "old", &owner, None).await.unwrap();

    let removed = registry.cleanup_abandoned_plans(&thread).await.unwrap();
    assert_eq!(removed, 1);

    let remaining: Vec<String> = registry
        .get_active_plans(&thread)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.plan_id)
        .collect();
    assert_eq!(remaining, vec!["young".to_string()]);
}

#[tokio::test]
async fn sub_second_silence_past_threshold_pauses() {
    let (registry, clock) = registry();
    let thread = ThreadId::from_str("thread-1");
    executing_plan(&registry, &thread, "p1").await;

    clock.advance(Duration::milliseconds(60_000));
    let report = registry.check_for_stalled_plans(&thread).await.unwrap();
    assert!(report.paused.is_empty());

    clock.advance(Duration::milliseconds(900));
    let report = registry.check_for_stalled_plans(&thread).await.unwrap();
    assert_eq!(report.paused, vec!["p1".to_string()]);

    clock.advance(Duration::milliseconds(59_200));
    let report = registry.check_for_stalled_plans(&thread).await.unwrap();
    assert_eq!(report.takeover_available, vec!["p1".to_string()]);
}

#[tokio::test]
async fn ttl_counts_milliseconds() {
    let (registry, clock) = registry();
    let thread = ThreadId::from_str("thread-1");
    executing_plan(&registry, &thread, "p1").await;

    clock.advance(Duration::seconds(300));
    assert_eq!(registry.cleanup_abandoned_plans(&thread).await.unwrap(), 0);

    clock.advance(Duration::milliseconds(100));
    assert_eq!(registry.cleanup_abandoned_plans(&thread).await.unwrap(), 1);
}

#[tokio::test]
async fn failover_end_to_end() {
    let kv = Arc::new(SqliteKvStore::in_memory().unwrap());
    let clock = Arc::new(ManualClock::default());
    let ids = Arc::new(SequentialIds::new("exec"));
    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();

    // Two instances sharing one store
    let instance_a =
        PlanLeaseRegistry::new(kv.clone(), clock.clone(), ids.clone()).with_event_bus(bus.clone());
    let instance_b = PlanLeaseRegistry::new(kv, clock.clone(), ids).with_event_bus(bus);
    let thread = ThreadId::from_str("thread-1");

    let e1 = instance_a
        .register_plan(&thread, "P1", "migrate tables", None, None)
        .await
        .unwrap();
    let ack = instance_a.send_heartbeat(&thread, "P1", &e1, None).await.unwrap();
    assert!(ack.accepted);

    clock.advance(Duration::seconds(150));
    let report = instance_b.check_for_stalled_plans(&thread).await.unwrap();
    assert_eq!(report.paused, vec!["P1".to_string()]);
    assert_eq!(report.takeover_available, vec!["P1".to_string()]);
    let plan = instance_b.get_plan(&thread, "P1").await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::Paused);
    assert!(plan.takeover_allowed);

    let outcome = instance_b.attempt_takeover(&thread, "P1").await.unwrap();
    assert!(outcome.success);
    let e2 = outcome.new_executor_id.unwrap();
    assert_ne!(e2, e1);
    assert_eq!(outcome.previous_executor_id.as_deref(), Some(e1.as_str()));

    let stale = instance_a.send_heartbeat(&thread, "P1", &e1, None).await.unwrap();
    assert!(!stale.accepted);
    assert!(stale.should_abort);

    let fresh = instance_b.send_heartbeat(&thread, "P1", &e2, None).await.unwrap();
    assert!(fresh.accepted);

    let plan = instance_a.get_plan(&thread, "P1").await.unwrap().unwrap();
    assert_eq!(plan.executor_id, e2);
    assert_eq!(plan.status, PlanStatus::Executing);
    assert_eq!(plan.heartbeat_count, 1);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::PlanTakenOver { new_executor_id, .. } if *new_executor_id == e2)));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::HeartbeatRejected { executor_id, .. } if *executor_id == e1)));
}
