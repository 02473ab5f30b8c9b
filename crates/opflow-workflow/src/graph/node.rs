use std::sync::Arc;

use serde::{Deserialize, Serialize};

use opflow_core::traits::Operator;
use opflow_core::types::{NodeId, PlanStep};

/// Caller-supplied node for manually assembled workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(flatten)]
    pub step: PlanStep,
}

impl NodeSpec {
    pub fn new(
        id: impl Into<NodeId>,
        operator_name: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            step: PlanStep::new(operator_name, instruction),
        }
    }
}

/// A node in the workflow graph: one operator bound to one instruction.
#[derive(Clone)]
pub struct Node {
    pub id: NodeId,
    pub step: PlanStep,
    operator: Arc<dyn Operator>,
}

impl Node {
    pub(crate) fn new(id: NodeId, step: PlanStep, operator: Arc<dyn Operator>) -> Self {
        Self { id, step, operator }
    }

    pub fn operator_name(&self) -> &str {
        &self.step.operator_name
    }

    pub fn instruction(&self) -> &str {
        &self.step.instruction
    }

    pub fn operator(&self) -> Arc<dyn Operator> {
        self.operator.clone()
    }

    /// One-line description used by `WorkflowGraph::render`.
    pub fn describe(&self) -> String {
        let mut line = format!("[{}] {}: {}", self.id, self.step.operator_name, self.step.instruction);
        if !self.step.input_fields.is_empty() || !self.step.output_fields.is_empty() {
            line.push_str(&format!(
                " (in: {}; out: {})",
                self.step.input_fields.join(", "),
                self.step.output_fields.join(", ")
            ));
        }
        line
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("step", &self.step)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_test_utils::StubOperator;

    #[test]
    fn test_node_spec_flattened_json() {
        let spec: NodeSpec = serde_json::from_str(
            r#"{"id": "load", "op": "sql", "instruction": "filter last 6 months"}"#,
        )
        .unwrap();
        assert_eq!(spec, NodeSpec::new("load", "sql", "filter last 6 months"));
    }

    #[test]
    fn test_describe() {
        let mut step = PlanStep::new("semantic_filter", "keep flooding reports");
        let node = Node::new(NodeId::ordinal(1), step.clone(), Arc::new(StubOperator::new("semantic_filter")));
        assert_eq!(node.describe(), "[n1] semantic_filter: keep flooding reports");

        step.input_fields = vec!["body".into()];
        step.output_fields = vec!["is_flooding".into()];
        let node = Node::new(NodeId::ordinal(1), step, Arc::new(StubOperator::new("semantic_filter")));
        assert_eq!(
            node.describe(),
            "[n1] semantic_filter: keep flooding reports (in: body; out: is_flooding)"
        );
    }
}
