use serde::{Deserialize, Serialize};

use opflow_core::types::NodeId;

/// A "produces input for" edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub from: NodeId,
    /// Target node id.
    pub to: NodeId,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Linear chain through `ids` in order: `ids[i] -> ids[i + 1]`.
    pub fn chain(ids: &[NodeId]) -> Vec<Edge> {
        ids.windows(2)
            .map(|pair| Edge::new(pair[0].clone(), pair[1].clone()))
            .collect()
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain() {
        let ids: Vec<NodeId> = (0..3).map(NodeId::ordinal).collect();
        let edges = Edge::chain(&ids);
        assert_eq!(edges, vec![Edge::new("n0", "n1"), Edge::new("n1", "n2")]);
    }

    #[test]
    fn test_chain_short() {
        assert!(Edge::chain(&[]).is_empty());
        assert!(Edge::chain(&[NodeId::ordinal(0)]).is_empty());
    }

    #[test]
    fn test_parse_edge_list() {
        let edges: Vec<Edge> =
            serde_json::from_str(r#"[{"from": "n0", "to": "n2"}, {"from": "n1", "to": "n2"}]"#)
                .unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1].to.as_str(), "n2");
        assert_eq!(edges[0].to_string(), "n0 -> n2");
    }
}
