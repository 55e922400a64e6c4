//! Graph execution engine: a resumable, node-based state machine.
//!
//! A workflow is a directed graph of [`Node`]s. Each invocation mutates the
//! thread's [`ExecutionState`](tether_core::state::ExecutionState) and returns
//! a [`Decision`]; the [`GraphExecutor`] routes on that decision through the
//! statically configured [`Edge`]s, applies per-kind retry bounds, guards
//! against runaway loops, and persists the state after every step.
//!
//! A reasoning node and a critic node can be wired into a verify-before-complete
//! loop with [`GraphBuilder::critic_loop`]: completion claims from the
//! reasoning node go to the critic, which either sends control back or lets the
//! run through to output.

pub mod decision;
pub mod definition;
pub mod edge;
pub mod executor;
pub mod node;
pub mod subgraph;

pub use decision::Decision;
pub use definition::{CriticLoop, Graph, GraphBuilder};
pub use edge::{Edge, EdgeCondition};
pub use executor::{ExecutionReport, GraphExecutor, NodeResult, RunStatus};
pub use node::Node;
pub use subgraph::SubGraphNode;
