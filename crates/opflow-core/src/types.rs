use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OpflowError, Result};

/// Unique identifier for one workflow execution.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a node within one workflow graph.
///
/// Plan-built graphs use ordinal ids (`n0`, `n1`, ...), so the same operator
/// may appear twice in a plan without its state entries colliding.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id for the node created from plan step `index`.
    pub fn ordinal(index: usize) -> Self {
        Self(format!("n{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl std::borrow::Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One operator invocation requested by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(alias = "op")]
    pub operator_name: String,
    #[serde(default)]
    pub instruction: String,
    /// Columns this step reads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_fields: Vec<String>,
    /// Columns this step produces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_fields: Vec<String>,
}

impl PlanStep {
    pub fn new(operator_name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            operator_name: operator_name.into(),
            instruction: instruction.into(),
            input_fields: vec![],
            output_fields: vec![],
        }
    }
}

/// Ordered operator plan. Serializes as a bare JSON array of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps whose operator name fails `is_known`, as `(position, name)`.
    pub fn unresolved(&self, is_known: impl Fn(&str) -> bool) -> Vec<(usize, String)> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| !is_known(&step.operator_name))
            .map(|(i, step)| (i, step.operator_name.clone()))
            .collect()
    }
}

impl FromIterator<PlanStep> for Plan {
    fn from_iter<I: IntoIterator<Item = PlanStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

/// Name and description of a registered operator, as shown to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDescriptor {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operator returned an error, panicked, or broke the state contract.
    Failed,
    /// The operator exceeded its timeout.
    TimedOut,
    /// The run was cancelled while this node was running or ready.
    Cancelled,
}

/// Failure detail recorded under a node id in `WorkflowState::errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub operator: String,
    pub kind: FailureKind,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl NodeFailure {
    pub fn new(operator: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            kind,
            message: message.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn cancelled(operator: impl Into<String>) -> Self {
        Self::new(operator, FailureKind::Cancelled, OpflowError::Cancelled.to_string())
    }
}

/// Node the state is currently handed to, attached by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCursor {
    pub node_id: NodeId,
    pub predecessors: Vec<NodeId>,
}

pub const STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    STATE_VERSION
}

/// The record threaded through every node of one workflow run.
///
/// Result and error entries are append-only per node id: once written they
/// are never replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default = "default_version")]
    pub version: u32,
    original_query: String,
    #[serde(default)]
    step_instructions: BTreeMap<NodeId, String>,
    #[serde(default)]
    node_results: BTreeMap<NodeId, serde_json::Value>,
    #[serde(default)]
    errors: BTreeMap<NodeId, NodeFailure>,
    #[serde(skip)]
    cursor: Option<NodeCursor>,
}

impl WorkflowState {
    pub fn new(original_query: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            original_query: original_query.into(),
            step_instructions: BTreeMap::new(),
            node_results: BTreeMap::new(),
            errors: BTreeMap::new(),
            cursor: None,
        }
    }

    /// Seed a state with the query and one instruction per node.
    pub fn seeded(
        original_query: impl Into<String>,
        instructions: impl IntoIterator<Item = (NodeId, String)>,
    ) -> Self {
        let mut state = Self::new(original_query);
        state.step_instructions = instructions.into_iter().collect();
        state
    }

    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    pub fn step_instructions(&self) -> &BTreeMap<NodeId, String> {
        &self.step_instructions
    }

    pub fn instruction(&self, node_id: &str) -> Option<&str> {
        self.step_instructions.get(node_id).map(|s| s.as_str())
    }

    pub fn node_results(&self) -> &BTreeMap<NodeId, serde_json::Value> {
        &self.node_results
    }

    pub fn result(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.node_results.get(node_id)
    }

    pub fn errors(&self) -> &BTreeMap<NodeId, NodeFailure> {
        &self.errors
    }

    pub fn error(&self, node_id: &str) -> Option<&NodeFailure> {
        self.errors.get(node_id)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Write a result entry. Returns `false` (and leaves the state unchanged)
    /// if the node already has one.
    pub fn insert_result(&mut self, node_id: NodeId, value: serde_json::Value) -> bool {
        if self.node_results.contains_key(&node_id) {
            return false;
        }
        self.node_results.insert(node_id, value);
        true
    }

    /// Write an error entry. Returns `false` if the node already has one.
    pub fn insert_error(&mut self, node_id: NodeId, failure: NodeFailure) -> bool {
        if self.errors.contains_key(&node_id) {
            return false;
        }
        self.errors.insert(node_id, failure);
        true
    }

    /// Attach the node this state is being handed to.
    pub fn attach(&mut self, cursor: NodeCursor) {
        self.cursor = Some(cursor);
    }

    pub fn detach(&mut self) -> Option<NodeCursor> {
        self.cursor.take()
    }

    pub fn current_node(&self) -> Result<&NodeId> {
        self.cursor
            .as_ref()
            .map(|c| &c.node_id)
            .ok_or(OpflowError::NoActiveNode)
    }

    /// Instruction for the node currently running; empty if none was given.
    pub fn current_instruction(&self) -> Result<&str> {
        let id = self.current_node()?;
        Ok(self.instruction(id.as_str()).unwrap_or_default())
    }

    /// Results of the current node's predecessors.
    ///
    /// One predecessor yields its result directly, several yield an object
    /// keyed by node id, none yields `null`.
    pub fn upstream_payload(&self) -> Result<serde_json::Value> {
        let cursor = self.cursor.as_ref().ok_or(OpflowError::NoActiveNode)?;
        let mut present: Vec<(&NodeId, &serde_json::Value)> = cursor
            .predecessors
            .iter()
            .filter_map(|id| self.node_results.get(id).map(|v| (id, v)))
            .collect();

        Ok(match present.len() {
            0 => serde_json::Value::Null,
            1 => present.remove(0).1.clone(),
            _ => serde_json::Value::Object(
                present
                    .into_iter()
                    .map(|(id, v)| (id.to_string(), v.clone()))
                    .collect(),
            ),
        })
    }

    /// Write the current node's result slot.
    pub fn set_result(&mut self, value: serde_json::Value) -> Result<()> {
        let id = self.current_node()?.clone();
        if self.insert_result(id.clone(), value) {
            Ok(())
        } else {
            Err(OpflowError::node(id, "result already written"))
        }
    }
}

/// Role in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Tabular result of a data-source query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Set when the result set had more rows than were returned.
    #[serde(default)]
    pub truncated: bool,
}

impl QueryRows {
    /// Keep at most `max_rows` rows; returns whether anything was dropped.
    pub fn truncate(&mut self, max_rows: usize) -> bool {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
        self.truncated
    }
}
