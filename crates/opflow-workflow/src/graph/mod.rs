//! Workflow graphs — DAG-based operator pipelines.
//!
//! A workflow is a directed acyclic graph of `Node`s, each binding one
//! registered operator to one plan instruction. `Edge`s mean
//! "produces input for".
//!
//! The `WorkflowBuilder` compiles a `Plan` (or hand-written node specs) into
//! a `WorkflowGraph` plus a seeded `WorkflowState`; the `WorkflowEngine`
//! walks the graph in dependency order, running independent branches
//! concurrently and merging each node's result into the state.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;
mod workflow;

pub use builder::{Workflow, WorkflowBuilder};
pub use edge::Edge;
pub use executor::{EngineOptions, ExecutionReport, NodeOutcome, NodeStatus, WorkflowEngine};
pub use node::{Node, NodeSpec};
pub use workflow::WorkflowGraph;
