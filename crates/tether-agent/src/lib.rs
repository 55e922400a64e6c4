pub mod graph;
pub mod lease;

pub use graph::{
    Decision, Edge, EdgeCondition, ExecutionReport, Graph, GraphBuilder, GraphExecutor, Node,
    NodeResult, RunStatus, SubGraphNode,
};
pub use lease::{
    HeartbeatAck, KeeperExit, LeaseKeeper, Plan, PlanLeaseRegistry, PlanStatus, StallReport,
    TakeoverOutcome,
};
