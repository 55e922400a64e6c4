use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use tether_core::config::EngineConfig;
use tether_core::error::{Result, TetherError};
use tether_core::event::EventBus;
use tether_core::state::{CriticDecision, Escalation, ExecutionState, END_NODE};
use tether_core::types::{EngineEvent, NodeKind};
use tether_memory::StateStore;

use super::decision::{Decision, COMPLETE};
use super::definition::Graph;

/// Result of executing a single node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Which node was executed.
    pub node_id: String,
    /// Decision label, or `failed:<signature>` for a recognized failure.
    pub outcome: String,
    /// Whether the node returned a decision.
    pub succeeded: bool,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
}

/// How a run terminated.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Reached `end` or a node without a successor.
    Completed,
    /// Terminated through a fallback or overflow node.
    Escalated(Escalation),
}

/// Result of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Per-node results in execution order.
    pub node_results: Vec<NodeResult>,
    pub status: RunStatus,
    /// Iterations counted against the global ceiling.
    pub iterations: u32,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

impl ExecutionReport {
    pub fn is_escalated(&self) -> bool {
        matches!(self.status, RunStatus::Escalated(_))
    }

    /// How many times a node was invoked during this run.
    pub fn invocations(&self, node_id: &str) -> usize {
        self.node_results
            .iter()
            .filter(|r| r.node_id == node_id)
            .count()
    }
}

enum Route {
    Goto(String),
    Finish,
    Overflow(Escalation),
}

/// Drives an [`ExecutionState`] through a [`Graph`].
///
/// Each step checks cancellation, resolves the current node, applies the loop
/// guards, runs the node, routes on its decision and persists the state. The
/// executor is the only writer of the state while a run is in progress.
pub struct GraphExecutor {
    graph: Graph,
    config: EngineConfig,
    states: Option<StateStore>,
    event_bus: Option<Arc<EventBus>>,
}

impl GraphExecutor {
    pub fn new(graph: Graph, config: EngineConfig) -> Self {
        Self {
            graph,
            config,
            states: None,
            event_bus: None,
        }
    }

    /// Persist state through `states` after every node invocation.
    pub fn with_state_store(mut self, states: StateStore) -> Self {
        self.states = Some(states);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the graph until a terminal decision or a hard stop.
    ///
    /// Starts at `start_node` if given, else resumes at
    /// `state.metadata.current_node_id`. A state that already finished is
    /// returned untouched unless a start node is given.
    pub async fn execute(
        &self,
        state: &mut ExecutionState,
        start_node: Option<&str>,
    ) -> Result<ExecutionReport> {
        let start = Instant::now();
        let mut node_results = Vec::new();

        match start_node {
            Some(node_id) => state.metadata.current_node_id = node_id.to_string(),
            None if state.is_finished() => {
                debug!(thread_id = %state.thread_id, "Run already finished, nothing to resume");
                return Ok(ExecutionReport {
                    node_results,
                    status: RunStatus::Completed,
                    iterations: 0,
                    total_elapsed_ms: 0,
                });
            }
            None => {}
        }

        state.metadata.begin_run();
        info!(
            thread_id = %state.thread_id,
            node_id = %state.metadata.current_node_id,
            "Graph run started"
        );
        self.emit(EngineEvent::RunStarted {
            thread_id: state.thread_id.clone(),
            node_id: state.metadata.current_node_id.clone(),
        });

        // Set once a loop guard forces the overflow node; that node is the last to run.
        let mut forced: Option<Escalation> = None;

        loop {
            let node_id = state.metadata.current_node_id.clone();

            if state.cancellation().is_cancelled() {
                return self.cancelled(state, &node_id);
            }

            let node = match self.graph.node(&node_id) {
                Some(n) => Arc::clone(n),
                None => {
                    error!(node_id = %node_id, "Current node is not in the graph");
                    return Err(TetherError::NodeNotFound(node_id));
                }
            };

            if forced.is_none() {
                if state.metadata.total_iteration_count >= self.config.max_iterations {
                    state.metadata.max_iterations_reached = true;
                    let escalation = Escalation::IterationCeiling {
                        limit: self.config.max_iterations,
                    };
                    match self.force_overflow(state, &node_id, escalation.clone()) {
                        Some(_) => {
                            forced = Some(escalation);
                            continue;
                        }
                        None => return self.finish(state, node_results, start).await,
                    }
                }

                let repeated = state.metadata.last_node_id.as_deref() == Some(node_id.as_str());
                if repeated
                    && state.metadata.consecutive_same_node_count
                        >= self.config.max_consecutive_same_node
                {
                    let escalation = Escalation::SameNodeCeiling {
                        node_id: node_id.clone(),
                        count: state.metadata.consecutive_same_node_count,
                    };
                    match self.force_overflow(state, &node_id, escalation.clone()) {
                        Some(_) => {
                            forced = Some(escalation);
                            continue;
                        }
                        None => return self.finish(state, node_results, start).await,
                    }
                }

                state.metadata.total_iteration_count += 1;
            }

            if state.metadata.last_node_id.as_deref() == Some(node_id.as_str()) {
                state.metadata.consecutive_same_node_count += 1;
            } else {
                state.metadata.consecutive_same_node_count = 1;
            }

            let kind = node.kind();
            let iteration = state.metadata.total_iteration_count;
            info!(
                thread_id = %state.thread_id,
                node_id = %node_id,
                kind = %kind,
                iteration,
                "Executing graph node"
            );
            self.emit(EngineEvent::NodeStarted {
                thread_id: state.thread_id.clone(),
                node_id: node_id.clone(),
                iteration,
            });

            let node_start = Instant::now();
            let outcome = node.run(state).await;
            let elapsed_ms = node_start.elapsed().as_millis() as u64;
            state.metadata.last_node_id = Some(node_id.clone());

            if state.cancellation().is_cancelled() {
                self.persist(state).await?;
                return self.cancelled(state, &node_id);
            }

            let (label, succeeded, classified) = match outcome {
                Ok(decision) => {
                    let label = decision.label();
                    let route = if forced.is_some() {
                        Ok(Route::Finish)
                    } else {
                        self.route_decision(state, &node_id, &kind, decision)
                    };
                    (label, true, route)
                }
                Err(TetherError::RecognizedFailure(signature)) => {
                    let label = format!("failed:{}", signature);
                    let route = if forced.is_some() {
                        warn!(node_id = %node_id, signature = %signature, "Overflow node failed");
                        Route::Finish
                    } else {
                        self.route_failure(state, &node_id, &kind, signature)
                    };
                    (label, false, Ok(route))
                }
                Err(e) => {
                    self.persist(state).await?;
                    if e.is_cancelled() {
                        return self.cancelled(state, &node_id);
                    }
                    error!(node_id = %node_id, error = %e, "Graph node failed");
                    return Err(match e {
                        TetherError::NodeFailed { .. } => e,
                        other => TetherError::node_failed(&node_id, other.to_string()),
                    });
                }
            };

            node_results.push(NodeResult {
                node_id: node_id.clone(),
                outcome: label.clone(),
                succeeded,
                elapsed_ms,
            });
            debug!(node_id = %node_id, decision = %label, elapsed_ms, "Node execution complete");
            self.emit(EngineEvent::NodeFinished {
                thread_id: state.thread_id.clone(),
                node_id: node_id.clone(),
                decision: label,
                elapsed_ms,
            });

            let route = match classified {
                Ok(route) => route,
                Err(e) => {
                    self.persist(state).await?;
                    return Err(e);
                }
            };

            match route {
                Route::Goto(target) if target != END_NODE => {
                    state.metadata.current_node_id = target;
                    self.persist(state).await?;
                }
                Route::Goto(_) | Route::Finish => {
                    return self.finish(state, node_results, start).await;
                }
                Route::Overflow(escalation) => {
                    match self.force_overflow(state, &node_id, escalation.clone()) {
                        Some(_) => {
                            forced = Some(escalation);
                            self.persist(state).await?;
                        }
                        None => return self.finish(state, node_results, start).await,
                    }
                }
            }
        }
    }

    fn route_decision(
        &self,
        state: &mut ExecutionState,
        node_id: &str,
        kind: &NodeKind,
        decision: Decision,
    ) -> Result<Route> {
        let critic = self.graph.critic_loop();
        let from_critic = critic.map(|c| c.critic == node_id).unwrap_or(false);

        match decision {
            Decision::Next => {
                state.metadata.retries.reset(kind);
                Ok(match self.graph.successor(node_id) {
                    Some(to) => Route::Goto(to.to_string()),
                    None => Route::Finish,
                })
            }
            Decision::End => {
                state.metadata.retries.reset(kind);
                Ok(Route::Finish)
            }
            Decision::Transition(name) => {
                state.metadata.retries.reset(kind);
                if from_critic && name == COMPLETE {
                    state.metadata.critic_decision = Some(CriticDecision::Complete);
                    info!(
                        thread_id = %state.thread_id,
                        react_loop_count = state.metadata.react_loop_count,
                        "Critic accepted completion"
                    );
                    self.emit(EngineEvent::CriticVerdict {
                        thread_id: state.thread_id.clone(),
                        accepted: true,
                        react_loop_count: state.metadata.react_loop_count,
                    });
                }
                match self.graph.transition(node_id, &name) {
                    Some(to) => Ok(Route::Goto(to.to_string())),
                    None => Err(TetherError::Config(format!(
                        "Node '{}' has no '{}' transition",
                        node_id, name
                    ))),
                }
            }
            Decision::Continue { target } => {
                let default_target = match critic {
                    Some(c) if from_critic => c.reasoning.as_str(),
                    _ => node_id,
                };
                let target = target.unwrap_or_else(|| default_target.to_string());

                if from_critic {
                    state.metadata.react_loop_count += 1;
                    state.metadata.critic_decision = Some(CriticDecision::Continue);
                    info!(
                        thread_id = %state.thread_id,
                        react_loop_count = state.metadata.react_loop_count,
                        target = %target,
                        "Critic rejected completion"
                    );
                    self.emit(EngineEvent::CriticVerdict {
                        thread_id: state.thread_id.clone(),
                        accepted: false,
                        react_loop_count: state.metadata.react_loop_count,
                    });
                }

                if target != END_NODE && !self.graph.contains(&target) {
                    return Err(TetherError::NodeNotFound(target));
                }
                Ok(Route::Goto(target))
            }
        }
    }

    fn route_failure(
        &self,
        state: &mut ExecutionState,
        node_id: &str,
        kind: &NodeKind,
        signature: String,
    ) -> Route {
        let attempts = state.metadata.retries.record_failure(kind);
        state.metadata.last_failure = Some(signature.clone());
        let bound = self
            .graph
            .retry_bound(node_id)
            .unwrap_or(self.config.default_retry_bound);

        if attempts < bound {
            warn!(
                node_id = %node_id,
                kind = %kind,
                attempt = attempts,
                bound,
                signature = %signature,
                "Recognized failure, retrying node"
            );
            self.emit(EngineEvent::RetryScheduled {
                thread_id: state.thread_id.clone(),
                node_id: node_id.to_string(),
                kind: kind.clone(),
                attempt: attempts,
                signature,
            });
            return Route::Goto(node_id.to_string());
        }

        state.metadata.retries.reset(kind);
        let escalation = Escalation::RetriesExhausted {
            node_id: node_id.to_string(),
            kind: kind.clone(),
            attempts,
        };

        match self.graph.fallback(node_id) {
            Some(fallback) => {
                warn!(
                    node_id = %node_id,
                    fallback = %fallback,
                    attempts,
                    "Retries exhausted, taking fallback edge"
                );
                self.record_escalation(state, node_id, escalation);
                Route::Goto(fallback.to_string())
            }
            None => Route::Overflow(escalation),
        }
    }

    /// Record `escalation` and point the run at the overflow node, if any.
    fn force_overflow(
        &self,
        state: &mut ExecutionState,
        node_id: &str,
        escalation: Escalation,
    ) -> Option<String> {
        self.record_escalation(state, node_id, escalation);
        let overflow = self.graph.overflow()?.to_string();
        state.metadata.current_node_id = overflow.clone();
        Some(overflow)
    }

    fn record_escalation(&self, state: &mut ExecutionState, node_id: &str, escalation: Escalation) {
        warn!(
            thread_id = %state.thread_id,
            node_id = %node_id,
            reason = %escalation,
            "Run escalated"
        );
        self.emit(EngineEvent::Escalated {
            thread_id: state.thread_id.clone(),
            node_id: node_id.to_string(),
            reason: escalation.to_string(),
        });
        state.metadata.escalation = Some(escalation);
    }

    async fn finish(
        &self,
        state: &mut ExecutionState,
        node_results: Vec<NodeResult>,
        start: Instant,
    ) -> Result<ExecutionReport> {
        state.metadata.current_node_id = END_NODE.to_string();
        self.persist(state).await?;

        let status = match state.metadata.escalation.clone() {
            Some(escalation) => RunStatus::Escalated(escalation),
            None => RunStatus::Completed,
        };
        let iterations = state.metadata.total_iteration_count;
        let total_elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            thread_id = %state.thread_id,
            iterations,
            escalated = matches!(status, RunStatus::Escalated(_)),
            total_elapsed_ms,
            "Graph run complete"
        );
        self.emit(EngineEvent::RunComplete {
            thread_id: state.thread_id.clone(),
            iterations,
            escalated: matches!(status, RunStatus::Escalated(_)),
        });

        Ok(ExecutionReport {
            node_results,
            status,
            iterations,
            total_elapsed_ms,
        })
    }

    fn cancelled(&self, state: &ExecutionState, node_id: &str) -> Result<ExecutionReport> {
        info!(thread_id = %state.thread_id, node_id = %node_id, "Graph run cancelled");
        self.emit(EngineEvent::RunCancelled {
            thread_id: state.thread_id.clone(),
            node_id: node_id.to_string(),
        });
        Err(TetherError::Cancelled)
    }

    async fn persist(&self, state: &ExecutionState) -> Result<()> {
        if let Some(ref states) = self.states {
            states.save(state).await?;
        }
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edge::Edge;
    use crate::graph::node::Node;
    use futures::future::BoxFuture;
    use tether_core::types::ThreadId;

    struct Fixed(Decision);

    impl Node for Fixed {
        fn kind(&self) -> NodeKind {
            NodeKind::Action
        }

        fn run<'a>(&'a self, _state: &'a mut ExecutionState) -> BoxFuture<'a, Result<Decision>> {
            let decision = self.0.clone();
            Box::pin(async move { Ok(decision) })
        }
    }

    fn executor(graph: Graph) -> GraphExecutor {
        GraphExecutor::new(graph, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_linear_run_completes() {
        let graph = Graph::builder("a")
            .node("a", Fixed(Decision::Next))
            .node("b", Fixed(Decision::Next))
            .edge(Edge::next("a", "b"))
            .build()
            .unwrap();
        let exec = executor(graph);
        let mut state = ExecutionState::new(ThreadId::from_str("t"), "a");

        let report = exec.execute(&mut state, None).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.invocations("a"), 1);
        assert_eq!(report.invocations("b"), 1);
        assert!(state.is_finished());
    }

    #[tokio::test]
    async fn test_edge_to_end_marker_finishes() {
        let graph = Graph::builder("a")
            .node("a", Fixed(Decision::Next))
            .node("b", Fixed(Decision::Next))
            .edge(Edge::next("a", END_NODE))
            .build()
            .unwrap();
        let exec = executor(graph);
        let mut state = ExecutionState::new(ThreadId::from_str("t"), "a");

        let report = exec.execute(&mut state, None).await.unwrap();
        assert_eq!(report.node_results.len(), 1);
        assert!(state.is_finished());
    }

    #[tokio::test]
    async fn test_finished_state_is_not_rerun() {
        let graph = Graph::builder("a")
            .node("a", Fixed(Decision::End))
            .build()
            .unwrap();
        let exec = executor(graph);
        let mut state = ExecutionState::new(ThreadId::from_str("t"), "a");
        exec.execute(&mut state, None).await.unwrap();

        let report = exec.execute(&mut state, None).await.unwrap();
        assert!(report.node_results.is_empty());

        let report = exec.execute(&mut state, Some("a")).await.unwrap();
        assert_eq!(report.invocations("a"), 1);
    }

    #[tokio::test]
    async fn test_unknown_transition_is_config_fault() {
        let graph = Graph::builder("a")
            .node("a", Fixed(Decision::transition("nowhere")))
            .build()
            .unwrap();
        let exec = executor(graph);
        let mut state = ExecutionState::new(ThreadId::from_str("t"), "a");

        let err = exec.execute(&mut state, None).await.unwrap_err();
        assert!(matches!(err, TetherError::Config(_)));
        assert_eq!(state.current_node(), "a");
    }

    #[tokio::test]
    async fn test_events_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let graph = Graph::builder("a")
            .node("a", Fixed(Decision::End))
            .build()
            .unwrap();
        let exec = executor(graph).with_event_bus(bus.clone());
        let mut state = ExecutionState::new(ThreadId::from_str("t"), "a");

        exec.execute(&mut state, None).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::RunStarted { .. }));
        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::NodeStarted { iteration: 1, .. }));
        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::NodeFinished { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::RunComplete {
                iterations: 1,
                escalated: false,
                ..
            }
        ));
    }
}
