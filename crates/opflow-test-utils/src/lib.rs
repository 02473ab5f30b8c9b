//! Fakes for the opflow service traits.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use opflow_core::config::ModelConfig;
use opflow_core::error::{OpflowError, Result};
use opflow_core::traits::{LlmClient, Operator, PlanProducer, QueryExecutor};
use opflow_core::types::{ChatMessage, OperatorDescriptor, Plan, QueryRows, WorkflowState};

/// Shared, ordered record of `start:<node>` / `end:<node>` markers.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Operator that writes its own name as the node result.
pub struct StubOperator {
    name: String,
    delay: Option<Duration>,
    log: Option<CallLog>,
}

impl StubOperator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            log: None,
        }
    }

    /// Sleep before writing the result.
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    fn record(&self, marker: String) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(marker);
        }
    }
}

impl Operator for StubOperator {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Test stub that records its own name"
    }
    fn execute(&self, state: WorkflowState) -> BoxFuture<'_, Result<WorkflowState>> {
        Box::pin(async move {
            let mut state = state;
            let node = state.current_node()?.clone();
            self.record(format!("start:{}", node));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            state.set_result(serde_json::Value::String(self.name.clone()))?;
            self.record(format!("end:{}", node));
            Ok(state)
        })
    }
}

/// Operator that always fails.
pub struct FailingOperator {
    name: String,
    message: String,
}

impl FailingOperator {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl Operator for FailingOperator {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Test stub that always fails"
    }
    fn execute(&self, state: WorkflowState) -> BoxFuture<'_, Result<WorkflowState>> {
        Box::pin(async move {
            let node = state.current_node()?.clone();
            Err(OpflowError::node(node, &self.message))
        })
    }
}

/// Operator that panics mid-execution.
pub struct PanickingOperator {
    name: String,
}

impl PanickingOperator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Operator for PanickingOperator {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Test stub that panics"
    }
    fn execute(&self, _state: WorkflowState) -> BoxFuture<'_, Result<WorkflowState>> {
        Box::pin(async move { explode(&self.name) })
    }
}

fn explode(name: &str) -> Result<WorkflowState> {
    panic!("operator {} exploded", name)
}

/// LLM client returning canned replies in order, recording every request.
pub struct MockLlmClient {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlmClient {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmClient for MockLlmClient {
    fn complete(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        self.requests.lock().unwrap().push(messages);
        let reply = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            reply.ok_or_else(|| OpflowError::LlmRequest("mock: no canned reply left".into()))
        })
    }
}

/// Planner returning a fixed plan regardless of the query.
pub struct StaticPlanner {
    plan: Plan,
}

impl StaticPlanner {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

impl PlanProducer for StaticPlanner {
    fn produce<'a>(
        &'a self,
        _query: &'a str,
        _operators: &'a [OperatorDescriptor],
    ) -> BoxFuture<'a, Result<Plan>> {
        Box::pin(async move { Ok(self.plan.clone()) })
    }
}

/// Query executor returning fixed rows, recording every statement.
pub struct StaticQueryExecutor {
    rows: QueryRows,
    queries: Mutex<Vec<String>>,
}

impl StaticQueryExecutor {
    pub fn new(rows: QueryRows) -> Self {
        Self {
            rows,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl QueryExecutor for StaticQueryExecutor {
    fn query(&self, sql: &str, max_rows: usize) -> BoxFuture<'_, Result<QueryRows>> {
        self.queries.lock().unwrap().push(sql.to_string());
        let mut rows = self.rows.clone();
        rows.truncate(max_rows);
        Box::pin(async move { Ok(rows) })
    }
}
