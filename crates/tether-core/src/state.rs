//! Execution state: the unit of resumability for a graph run.
//!
//! One `ExecutionState` exists per thread. The graph executor is its only
//! writer during a run and persists it after every node invocation, so a later
//! call can resume at `metadata.current_node_id`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cancel::RunCancellation;
use crate::types::{ChatMessage, NodeKind, ThreadId};

/// Distinguished `current_node_id` of a run that reached a terminal decision.
pub const END_NODE: &str = "__end__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub thread_id: ThreadId,
    messages: Vec<ChatMessage>,
    pub metadata: Metadata,
    #[serde(skip)]
    cancel: RunCancellation,
}

impl ExecutionState {
    /// Create a fresh state positioned at `entry_node`.
    pub fn new(thread_id: ThreadId, entry_node: impl Into<String>) -> Self {
        Self {
            thread_id,
            messages: Vec::new(),
            metadata: Metadata::starting_at(entry_node),
            cancel: RunCancellation::new(),
        }
    }

    /// Conversation turns in order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Append a turn. Messages are never removed or reordered during a run.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// The cancellation signal observed by the executor between node steps.
    pub fn cancellation(&self) -> &RunCancellation {
        &self.cancel
    }

    /// Replace the cancellation signal, e.g. with a child of a parent run's.
    pub fn set_cancellation(&mut self, cancel: RunCancellation) {
        self.cancel = cancel;
    }

    pub fn current_node(&self) -> &str {
        &self.metadata.current_node_id
    }

    pub fn is_finished(&self) -> bool {
        self.metadata.current_node_id == END_NODE
    }
}

/// Typed run metadata. Each subsystem owns its own fields, so node kinds
/// cannot collide on names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub current_node_id: String,
    /// Node run on the previous step, used for self-loop detection.
    #[serde(default)]
    pub last_node_id: Option<String>,
    #[serde(default)]
    pub consecutive_same_node_count: u32,
    #[serde(default)]
    pub total_iteration_count: u32,
    #[serde(default)]
    pub max_iterations_reached: bool,
    #[serde(default)]
    pub retries: RetryTracker,
    #[serde(default)]
    pub react_loop_count: u32,
    #[serde(default)]
    pub sub_graph_trigger: Option<SubGraphTrigger>,
    #[serde(default)]
    pub critic_decision: Option<CriticDecision>,
    /// Why the run was forced into a fallback or overflow node.
    #[serde(default)]
    pub escalation: Option<Escalation>,
    /// Latest recognized failure signature.
    #[serde(default)]
    pub last_failure: Option<String>,
}

impl Metadata {
    pub fn starting_at(node_id: impl Into<String>) -> Self {
        Self {
            current_node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Reset the per-run loop guards. Retry counters and the react loop count
    /// survive across resumptions.
    pub fn begin_run(&mut self) {
        self.last_node_id = None;
        self.consecutive_same_node_count = 0;
        self.total_iteration_count = 0;
        self.max_iterations_reached = false;
        self.escalation = None;
    }

    pub fn planner_retries(&self) -> u32 {
        self.retries.attempts(&NodeKind::Planner)
    }

    pub fn reasoning_retries(&self) -> u32 {
        self.retries.attempts(&NodeKind::Reasoning)
    }

    /// Record a hand-off request for the sub-graph node to pick up.
    pub fn trigger_sub_graph(&mut self, name: impl Into<String>, prompt: impl Into<String>) {
        self.sub_graph_trigger = Some(SubGraphTrigger {
            state: SubGraphStatus::Pending,
            name: name.into(),
            prompt: prompt.into(),
            response: None,
        });
    }
}

/// Bounded-attempt counters, one per retryable node kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryTracker {
    counters: BTreeMap<String, u32>,
}

impl RetryTracker {
    pub fn attempts(&self, kind: &NodeKind) -> u32 {
        self.counters.get(&counter_key(kind)).copied().unwrap_or(0)
    }

    /// Count one more recognized failure and return the new total.
    pub fn record_failure(&mut self, kind: &NodeKind) -> u32 {
        let count = self.counters.entry(counter_key(kind)).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&mut self, kind: &NodeKind) {
        self.counters.remove(&counter_key(kind));
    }

    pub fn is_exhausted(&self, kind: &NodeKind, bound: u32) -> bool {
        self.attempts(kind) >= bound
    }
}

fn counter_key(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Custom(name) => format!("custom:{}", name),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubGraphStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Hand-off record for a nested sub-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubGraphTrigger {
    pub state: SubGraphStatus,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub response: Option<String>,
}

/// The critic's ruling on a completion claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticDecision {
    Continue,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Escalation {
    /// The global per-run iteration ceiling was exceeded.
    IterationCeiling { limit: u32 },
    /// The same node ran too many times in a row.
    SameNodeCeiling { node_id: String, count: u32 },
    /// A node kind hit its retry bound.
    RetriesExhausted {
        node_id: String,
        kind: NodeKind,
        attempts: u32,
    },
}

impl std::fmt::Display for Escalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Escalation::IterationCeiling { limit } => {
                write!(f, "iteration ceiling of {} exceeded", limit)
            }
            Escalation::SameNodeCeiling { node_id, count } => {
                write!(f, "node '{}' ran {} times in a row", node_id, count)
            }
            Escalation::RetriesExhausted {
                node_id,
                kind,
                attempts,
            } => write!(
                f,
                "node '{}' ({}) failed {} times",
                node_id, kind, attempts
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_tracker_counts_per_kind() {
        let mut retries = RetryTracker::default();
        assert_eq!(retries.record_failure(&NodeKind::Planner), 1);
        assert_eq!(retries.record_failure(&NodeKind::Planner), 2);
        assert_eq!(retries.record_failure(&NodeKind::Reasoning), 1);

        assert!(retries.is_exhausted(&NodeKind::Planner, 2));
        assert!(!retries.is_exhausted(&NodeKind::Reasoning, 2));

        retries.reset(&NodeKind::Planner);
        assert_eq!(retries.attempts(&NodeKind::Planner), 0);
        assert_eq!(retries.attempts(&NodeKind::Reasoning), 1);
    }

    #[test]
    fn custom_kinds_do_not_collide_with_builtin() {
        let mut retries = RetryTracker::default();
        retries.record_failure(&NodeKind::Custom("planner".into()));
        assert_eq!(retries.attempts(&NodeKind::Planner), 0);
        assert_eq!(retries.attempts(&NodeKind::Custom("planner".into())), 1);
    }

    #[test]
    fn begin_run_keeps_retry_counters() {
        let mut meta = Metadata::starting_at("plan");
        meta.total_iteration_count = 7;
        meta.consecutive_same_node_count = 2;
        meta.max_iterations_reached = true;
        meta.react_loop_count = 3;
        meta.retries.record_failure(&NodeKind::Planner);

        meta.begin_run();

        assert_eq!(meta.total_iteration_count, 0);
        assert_eq!(meta.consecutive_same_node_count, 0);
        assert!(!meta.max_iterations_reached);
        assert_eq!(meta.react_loop_count, 3);
        assert_eq!(meta.planner_retries(), 1);
    }

    #[test]
    fn state_survives_json_persistence() {
        let mut state = ExecutionState::new(ThreadId::from_str("thread-1"), "input");
        state.push_message(ChatMessage::user("hello"));
        state.metadata.retries.record_failure(&NodeKind::Reasoning);
        state.metadata.trigger_sub_graph("research", "look it up");
        state.metadata.escalation = Some(Escalation::RetriesExhausted {
            node_id: "plan".into(),
            kind: NodeKind::Custom("lint".into()),
            attempts: 3,
        });

        let json = serde_json::to_value(&state).unwrap();
        let restored: ExecutionState = serde_json::from_value(json).unwrap();

        assert_eq!(restored.thread_id.as_str(), "thread-1");
        assert_eq!(restored.messages().len(), 1);
        assert_eq!(restored.metadata.reasoning_retries(), 1);
        assert_eq!(
            restored.metadata.sub_graph_trigger.as_ref().map(|t| t.state),
            Some(SubGraphStatus::Pending)
        );
        assert_eq!(restored.metadata.escalation, state.metadata.escalation);
        assert!(!restored.cancellation().is_cancelled());
    }
}
