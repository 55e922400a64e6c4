//! Two instances coordinating through one SQLite file.

use std::sync::Arc;

use chrono::Duration;

use tether_agent::{PlanLeaseRegistry, PlanStatus};
use tether_core::state::ExecutionState;
use tether_core::types::{ChatMessage, ThreadId};
use tether_memory::{SqliteKvStore, StateStore};
use tether_test_utils::{ManualClock, SequentialIds};

#[tokio::test]
async fn test_lease_failover_across_connections() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("state.db");
    let clock = Arc::new(ManualClock::default());

    let first = PlanLeaseRegistry::new(
        Arc::new(SqliteKvStore::open(&path).unwrap()),
        clock.clone(),
        Arc::new(SequentialIds::new("a")),
    );
    let second = PlanLeaseRegistry::new(
        Arc::new(SqliteKvStore::open(&path).unwrap()),
        clock.clone(),
        Arc::new(SequentialIds::new("b")),
    );
    let thread = ThreadId::from_str("support-42");

    let owner = first
        .register_plan(&thread, "refund", "issue refund", Some("billing"), None)
        .await
        .unwrap();
    assert!(first.send_heartbeat(&thread, "refund", &owner, None).await.unwrap().accepted);

    let seen = second.get_active_plans(&thread).await.unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].executor_id, "a-1");

    clock.advance(Duration::seconds(130));
    second.check_for_stalled_plans(&thread).await.unwrap();
    let outcome = second.attempt_takeover(&thread, "refund").await.unwrap();
    assert_eq!(outcome.new_executor_id.as_deref(), Some("b-1"));

    let ack = first.send_heartbeat(&thread, "refund", &owner, None).await.unwrap();
    assert!(ack.should_abort);

    assert!(second
        .update_plan_status(&thread, "refund", "b-1", PlanStatus::Completed)
        .await
        .unwrap());
    assert!(first.remove_plan(&thread, "refund").await.unwrap());
    assert!(second.get_active_plans(&thread).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_thread_state_survives_reopen() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("state.db");
    let thread = ThreadId::from_str("support-42");

    {
        let states = StateStore::new(Arc::new(SqliteKvStore::open(&path).unwrap()));
        let mut state = ExecutionState::new(thread.clone(), "reason");
        state.push_message(ChatMessage::user("where is my order?"));
        state.metadata.react_loop_count = 2;
        states.save(&state).await.unwrap();
    }

    let states = StateStore::new(Arc::new(SqliteKvStore::open(&path).unwrap()));
    let state = states.load(&thread).await.unwrap().expect("state persisted");
    assert_eq!(state.current_node(), "reason");
    assert_eq!(state.metadata.react_loop_count, 2);
    assert_eq!(states.list_threads().await.unwrap(), vec![thread]);
}
