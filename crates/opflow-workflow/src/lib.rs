pub mod graph;

pub use graph::{
    Edge, EngineOptions, ExecutionReport, Node, NodeOutcome, NodeSpec, NodeStatus, Workflow,
    WorkflowBuilder, WorkflowEngine, WorkflowGraph,
};
