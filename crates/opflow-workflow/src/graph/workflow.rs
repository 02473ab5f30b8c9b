use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::warn;

use opflow_core::error::{OpflowError, Result};
use opflow_core::types::{NodeId, WorkflowState};

use super::edge::Edge;
use super::node::Node;

/// A validated, acyclic workflow graph.
///
/// Nodes live in an arena indexed by position; edges are kept both as the
/// deduplicated list and as per-node successor/predecessor indices. The graph
/// is immutable once built.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    query: String,
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl WorkflowGraph {
    /// Validate `nodes` and `edges` and assemble the graph.
    ///
    /// Fails on duplicate node ids, edges naming unknown nodes, self loops,
    /// and cycles. Repeated edges are collapsed.
    pub(crate) fn new(query: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(OpflowError::DuplicateNode(node.id.to_string()));
            }
        }

        let mut successors = vec![Vec::new(); nodes.len()];
        let mut predecessors = vec![Vec::new(); nodes.len()];
        let mut kept = Vec::with_capacity(edges.len());

        for edge in edges {
            let from = *index.get(&edge.from).ok_or_else(|| OpflowError::InvalidEdge {
                from: edge.from.to_string(),
                to: edge.to.to_string(),
                reason: format!("unknown source node '{}'", edge.from),
            })?;
            let to = *index.get(&edge.to).ok_or_else(|| OpflowError::InvalidEdge {
                from: edge.from.to_string(),
                to: edge.to.to_string(),
                reason: format!("unknown target node '{}'", edge.to),
            })?;
            if from == to {
                return Err(OpflowError::CyclicWorkflow {
                    nodes: vec![edge.from.to_string()],
                });
            }
            if successors[from].contains(&to) {
                warn!(edge = %edge, "Ignoring duplicate edge");
                continue;
            }
            successors[from].push(to);
            predecessors[to].push(from);
            kept.push(edge);
        }

        let order = topological_sort(&successors, &predecessors).map_err(|stuck| {
            OpflowError::CyclicWorkflow {
                nodes: stuck.into_iter().map(|i| nodes[i].id.to_string()).collect(),
            }
        })?;

        Ok(Self {
            query: query.into(),
            nodes,
            index,
            edges: kept,
            successors,
            predecessors,
            order,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion (plan) order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Node ids in a dependency-respecting order. Ties break by insertion order.
    pub fn topological_order(&self) -> Vec<&NodeId> {
        self.order.iter().map(|&i| &self.nodes[i].id).collect()
    }

    /// Nodes with no incoming edges.
    pub fn entry_nodes(&self) -> Vec<&NodeId> {
        self.ids_where(|i| self.predecessors[i].is_empty())
    }

    /// Nodes with no outgoing edges.
    pub fn terminal_nodes(&self) -> Vec<&NodeId> {
        self.ids_where(|i| self.successors[i].is_empty())
    }

    pub fn predecessors(&self, id: &str) -> Vec<&NodeId> {
        self.index
            .get(id)
            .map(|&i| self.predecessors[i].iter().map(|&p| &self.nodes[p].id).collect())
            .unwrap_or_default()
    }

    pub fn successors(&self, id: &str) -> Vec<&NodeId> {
        self.index
            .get(id)
            .map(|&i| self.successors[i].iter().map(|&s| &self.nodes[s].id).collect())
            .unwrap_or_default()
    }

    /// A fresh state for one run of this graph: the query plus every node's
    /// instruction, and no results or errors.
    pub fn seed_state(&self) -> WorkflowState {
        WorkflowState::seeded(
            self.query.clone(),
            self.nodes
                .iter()
                .map(|n| (n.id.clone(), n.step.instruction.clone())),
        )
    }

    /// Human-readable listing of nodes followed by edges.
    pub fn render(&self) -> String {
        let mut out = format!("Workflow: {}\n", self.query);
        out.push_str("Nodes:\n");
        for node in &self.nodes {
            out.push_str("  ");
            out.push_str(&node.describe());
            out.push('\n');
        }
        out.push_str("Edges:\n");
        if self.edges.is_empty() {
            out.push_str("  (none)\n");
        }
        for edge in &self.edges {
            out.push_str(&format!("  {}\n", edge));
        }
        out
    }

    pub(crate) fn node_at(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub(crate) fn successor_indices(&self, index: usize) -> &[usize] {
        &self.successors[index]
    }

    pub(crate) fn predecessor_indices(&self, index: usize) -> &[usize] {
        &self.predecessors[index]
    }

    fn ids_where(&self, keep: impl Fn(usize) -> bool) -> Vec<&NodeId> {
        (0..self.nodes.len())
            .filter(|&i| keep(i))
            .map(|i| &self.nodes[i].id)
            .collect()
    }
}

/// Kahn's algorithm over index adjacency lists.
///
/// On a cycle, returns the indices that never reached in-degree zero.
fn topological_sort(
    successors: &[Vec<usize>],
    predecessors: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = (0..in_degree.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        let mut released = BTreeSet::new();
        for &next in &successors[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                released.insert(next);
            }
        }
        queue.extend(released);
    }

    if order.len() == in_degree.len() {
        Ok(order)
    } else {
        Err((0..in_degree.len()).filter(|&i| in_degree[i] > 0).collect())
    }
}
