use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Operator — one named data-processing capability.
///
/// The handler receives the run's state with a cursor attached for its node,
/// writes its own result slot, and returns the state. Failures are reported
/// as `Err`, never as a sentinel value.
pub trait Operator: Send + Sync + 'static {
    /// Operator name (used in plans).
    fn name(&self) -> &str;

    /// Human-readable description, shown to the planner.
    fn description(&self) -> &str;

    /// Run the operator against the state.
    fn execute(&self, state: WorkflowState) -> BoxFuture<'_, Result<WorkflowState>>;

    /// Timeout in seconds for one invocation (None = engine default).
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
}

/// LLM client — single-shot chat completion.
pub trait LlmClient: Send + Sync + 'static {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>>;
}

/// Plan producer — turns a natural-language query into an operator plan.
///
/// Operator names outside `operators` must be kept in the plan, not dropped.
pub trait PlanProducer: Send + Sync + 'static {
    fn produce<'a>(
        &'a self,
        query: &'a str,
        operators: &'a [OperatorDescriptor],
    ) -> BoxFuture<'a, Result<Plan>>;
}

/// Structured-query execution against a data source.
pub trait QueryExecutor: Send + Sync + 'static {
    /// Run `sql`, returning at most `max_rows` rows. `QueryRows::truncated`
    /// reports whether more were available.
    fn query(&self, sql: &str, max_rows: usize) -> BoxFuture<'_, Result<QueryRows>>;
}
