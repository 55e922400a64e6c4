use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use tether_core::error::{Result, TetherError};
use tether_core::state::{ExecutionState, SubGraphStatus};
use tether_core::types::{ChatMessage, NodeKind, Role};

use super::decision::Decision;
use super::executor::GraphExecutor;
use super::node::Node;

/// Runs a nested graph on behalf of the parent run.
///
/// A node requests the hand-off by calling
/// [`Metadata::trigger_sub_graph`](tether_core::state::Metadata::trigger_sub_graph)
/// and returning [`Decision::trigger_subgraph`]. This node picks the request
/// up, runs the named graph on a child thread with a child cancellation
/// signal, and writes the nested run's last assistant reply back into the
/// trigger and the parent's messages.
#[derive(Default)]
pub struct SubGraphNode {
    graphs: HashMap<String, Arc<GraphExecutor>>,
}

impl SubGraphNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `executor` available under `name`.
    pub fn with_graph(mut self, name: impl Into<String>, executor: Arc<GraphExecutor>) -> Self {
        self.graphs.insert(name.into(), executor);
        self
    }

    async fn hand_off(&self, state: &mut ExecutionState) -> Result<Decision> {
        let (name, prompt) = match state.metadata.sub_graph_trigger.as_mut() {
            Some(trigger) if trigger.state == SubGraphStatus::Completed => {
                return Ok(Decision::Next);
            }
            // Pending, or re-entered after a crash or a failed attempt
            Some(trigger) => {
                trigger.state = SubGraphStatus::Running;
                (trigger.name.clone(), trigger.prompt.clone())
            }
            None => return Err(TetherError::recognized("no sub-graph trigger")),
        };

        let executor = match self.graphs.get(&name) {
            Some(e) => Arc::clone(e),
            None => {
                mark(state, SubGraphStatus::Failed, None);
                return Err(TetherError::recognized(format!("unknown sub-graph '{}'", name)));
            }
        };

        let mut child = ExecutionState::new(
            state.thread_id.child(&name),
            executor.graph().entry().to_string(),
        );
        child.set_cancellation(state.cancellation().child());
        child.push_message(ChatMessage::user(prompt));

        info!(
            thread_id = %state.thread_id,
            child_thread_id = %child.thread_id,
            sub_graph = %name,
            "Handing off to sub-graph"
        );

        match executor.execute(&mut child, None).await {
            Ok(report) => {
                let response = child
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .map(|m| m.text().to_string());

                let Some(response) = response else {
                    mark(state, SubGraphStatus::Failed, None);
                    return Err(TetherError::recognized(format!(
                        "sub-graph '{}' produced no reply",
                        name
                    )));
                };

                info!(
                    sub_graph = %name,
                    iterations = report.iterations,
                    escalated = report.is_escalated(),
                    "Sub-graph complete"
                );
                state.push_message(ChatMessage::assistant(response.clone()));
                mark(state, SubGraphStatus::Completed, Some(response));
                Ok(Decision::Next)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(sub_graph = %name, error = %e, "Sub-graph failed");
                mark(state, SubGraphStatus::Failed, None);
                Err(e)
            }
        }
    }
}

fn mark(state: &mut ExecutionState, status: SubGraphStatus, response: Option<String>) {
    if let Some(trigger) = state.metadata.sub_graph_trigger.as_mut() {
        trigger.state = status;
        if response.is_some() {
            trigger.response = response;
        }
    }
}

impl Node for SubGraphNode {
    fn kind(&self) -> NodeKind {
        NodeKind::SubGraph
    }

    fn run<'a>(&'a self, state: &'a mut ExecutionState) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(self.hand_off(state))
    }
}
