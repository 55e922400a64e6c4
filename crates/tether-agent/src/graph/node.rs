use futures::future::BoxFuture;

use tether_core::error::Result;
use tether_core::state::ExecutionState;
use tether_core::types::NodeKind;

use super::decision::Decision;

/// A unit of work in the execution graph.
///
/// Nodes mutate the state they are given and report where to go next. A
/// node-kind-specific shape defect (an empty plan, a missing decision payload)
/// is reported as [`TetherError::RecognizedFailure`](tether_core::TetherError::RecognizedFailure),
/// which the executor retries up to the kind's bound. Any other error aborts
/// the run.
///
/// Long-running nodes may check `state.cancellation()` themselves; the
/// executor only checks it between invocations.
pub trait Node: Send + Sync + 'static {
    /// The kind whose retry counter this node uses.
    fn kind(&self) -> NodeKind;

    fn run<'a>(&'a self, state: &'a mut ExecutionState) -> BoxFuture<'a, Result<Decision>>;
}
