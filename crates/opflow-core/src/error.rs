use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpflowError {
    // Registry errors
    #[error("Operator already registered: {0}")]
    DuplicateOperator(String),

    #[error("Unknown operator '{name}'{}", plan_position(.position))]
    UnknownOperator {
        name: String,
        position: Option<usize>,
    },

    // Graph build errors
    #[error("Workflow graph contains a cycle through: {}", .nodes.join(", "))]
    CyclicWorkflow { nodes: Vec<String> },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Invalid edge {from} -> {to}: {reason}")]
    InvalidEdge {
        from: String,
        to: String,
        reason: String,
    },

    // Execution errors
    #[error("Node {node_id} failed: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("Operator timeout after {timeout_secs}s on node {node_id}")]
    OperatorTimeout { node_id: String, timeout_secs: u64 },

    #[error("No active node: state is not attached to a running node")]
    NoActiveNode,

    #[error("Workflow cancelled")]
    Cancelled,

    // Planner errors
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Data source errors
    #[error("Data source error: {0}")]
    DataSource(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OpflowError {
    /// Wrap any displayable failure as a node execution error.
    pub fn node(node_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::NodeExecution {
            node_id: node_id.into(),
            message: message.to_string(),
        }
    }
}

fn plan_position(position: &Option<usize>) -> String {
    position
        .map(|p| format!(" at plan step {}", p))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, OpflowError>;
