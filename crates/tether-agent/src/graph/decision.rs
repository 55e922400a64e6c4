/// Name of the transition a node takes to claim its work is complete.
pub const COMPLETE: &str = "complete";

/// Name of the transition that hands off to a nested sub-graph run.
pub const TRIGGER_SUBGRAPH: &str = "trigger_subgraph";

/// The routing outcome of one node invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Advance along the node's static successor edge.
    Next,
    /// Terminate the run successfully.
    End,
    /// Loop back to `target`, or to the node's default loop target when `None`
    /// (itself, or the reasoning node when issued by a critic).
    Continue { target: Option<String> },
    /// Take a named transition configured on the node.
    Transition(String),
}

impl Decision {
    pub fn continue_here() -> Self {
        Self::Continue { target: None }
    }

    pub fn continue_to(target: impl Into<String>) -> Self {
        Self::Continue {
            target: Some(target.into()),
        }
    }

    pub fn transition(name: impl Into<String>) -> Self {
        Self::Transition(name.into())
    }

    /// Claim completion. Inside a critic loop this routes to the critic.
    pub fn complete() -> Self {
        Self::Transition(COMPLETE.to_string())
    }

    pub fn trigger_subgraph() -> Self {
        Self::Transition(TRIGGER_SUBGRAPH.to_string())
    }

    /// Short label for logs and execution reports.
    pub fn label(&self) -> String {
        match self {
            Decision::Next => "next".to_string(),
            Decision::End => "end".to_string(),
            Decision::Continue { target: None } => "continue".to_string(),
            Decision::Continue { target: Some(t) } => format!("continue:{}", t),
            Decision::Transition(name) => format!("transition:{}", name),
        }
    }
}
