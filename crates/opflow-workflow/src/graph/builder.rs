use std::sync::Arc;

use tracing::{debug, info};

use opflow_core::error::{OpflowError, Result};
use opflow_core::types::{NodeId, Plan, WorkflowState};
use opflow_operators::OperatorRegistry;

use super::edge::Edge;
use super::node::{Node, NodeSpec};
use super::workflow::WorkflowGraph;

/// A built graph together with the state seeded for its first run.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub graph: WorkflowGraph,
    pub state: WorkflowState,
}

/// Compiles plans and node specs into validated workflow graphs.
///
/// Building is all-or-nothing: on any error no graph or state is returned,
/// and the registry is only ever read.
pub struct WorkflowBuilder {
    registry: Arc<OperatorRegistry>,
}

impl WorkflowBuilder {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Build one node per plan step with ordinal ids `n0, n1, ...`.
    ///
    /// Without `explicit_edges` the nodes form a linear chain in step order.
    pub fn build_from_plan(
        &self,
        query: &str,
        plan: &Plan,
        explicit_edges: Option<&[Edge]>,
    ) -> Result<Workflow> {
        let specs = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| NodeSpec {
                id: NodeId::ordinal(i),
                step: step.clone(),
            })
            .collect();
        self.build_manual(query, specs, explicit_edges)
    }

    /// Build from caller-supplied node specs, validated the same way as plans.
    pub fn build_manual(
        &self,
        query: &str,
        specs: Vec<NodeSpec>,
        edges: Option<&[Edge]>,
    ) -> Result<Workflow> {
        let mut nodes = Vec::with_capacity(specs.len());
        for (position, spec) in specs.into_iter().enumerate() {
            let operator = self
                .registry
                .get(&spec.step.operator_name)
                .ok_or_else(|| OpflowError::UnknownOperator {
                    name: spec.step.operator_name.clone(),
                    position: Some(position),
                })?;
            nodes.push(Node::new(spec.id, spec.step, operator.operator()));
        }

        let edges = match edges {
            Some(explicit) => explicit.to_vec(),
            None => {
                let ids: Vec<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();
                Edge::chain(&ids)
            }
        };

        let graph = WorkflowGraph::new(query, nodes, edges)?;
        let state = graph.seed_state();

        info!(
            nodes = graph.len(),
            edges = graph.edges().len(),
            "Workflow graph built"
        );
        debug!(order = ?graph.topological_order(), "Topological order");

        Ok(Workflow { graph, state })
    }
}
