use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a logical, resumable conversation.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the thread id of a nested run.
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{}", self.0, name))
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn text(&self) -> &str {
        &self.content
    }
}

/// The kind of work a node performs. Retry counters are keyed by kind, so two
/// nodes of the same kind share one bounded budget.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Input,
    Planner,
    Reasoning,
    Action,
    Critic,
    Output,
    SubGraph,
    Custom(String),
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Input => write!(f, "input"),
            NodeKind::Planner => write!(f, "planner"),
            NodeKind::Reasoning => write!(f, "reasoning"),
            NodeKind::Action => write!(f, "action"),
            NodeKind::Critic => write!(f, "critic"),
            NodeKind::Output => write!(f, "output"),
            NodeKind::SubGraph => write!(f, "sub_graph"),
            NodeKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Event emitted by the engine and the lease registry.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Graph run started (or resumed) at a node.
    RunStarted { thread_id: ThreadId, node_id: String },
    /// Node invocation started.
    NodeStarted { thread_id: ThreadId, node_id: String, iteration: u32 },
    /// Node invocation finished with a decision label.
    NodeFinished { thread_id: ThreadId, node_id: String, decision: String, elapsed_ms: u64 },
    /// A recognized failure will re-run the same node.
    RetryScheduled { thread_id: ThreadId, node_id: String, kind: NodeKind, attempt: u32, signature: String },
    /// The run was forced into a fallback or overflow node.
    Escalated { thread_id: ThreadId, node_id: String, reason: String },
    /// The critic ratified or rejected a completion claim.
    CriticVerdict { thread_id: ThreadId, accepted: bool, react_loop_count: u32 },
    /// Graph run finished.
    RunComplete { thread_id: ThreadId, iterations: u32, escalated: bool },
    /// Graph run stopped at a step boundary because of cancellation.
    RunCancelled { thread_id: ThreadId, node_id: String },
    /// A plan lease was created.
    PlanRegistered { thread_id: ThreadId, plan_id: String, executor_id: String },
    /// A heartbeat from a non-owner (or for a missing plan) was rejected.
    HeartbeatRejected { thread_id: ThreadId, plan_id: String, executor_id: String },
    /// The stall sweep paused an executing plan.
    PlanPaused { thread_id: ThreadId, plan_id: String, silent_secs: i64 },
    /// The stall sweep opened a plan for takeover.
    TakeoverAvailable { thread_id: ThreadId, plan_id: String, silent_secs: i64 },
    /// Lease ownership was transferred.
    PlanTakenOver { thread_id: ThreadId, plan_id: String, previous_executor_id: String, new_executor_id: String },
    /// A plan record was removed (explicitly or by the TTL sweep).
    PlanRemoved { thread_id: ThreadId, plan_id: String },
}
