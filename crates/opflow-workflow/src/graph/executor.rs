use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use opflow_core::config::EngineConfig;
use opflow_core::error::OpflowError;
use opflow_core::event::{EventBus, WorkflowEvent};
use opflow_core::types::{FailureKind, NodeCursor, NodeFailure, NodeId, RunId, WorkflowState};

use super::workflow::WorkflowGraph;

/// Final status of a node after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Never launched (run aborted or cancelled first).
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Downstream of a failure while other branches continued.
    Skipped,
    Cancelled,
}

/// Result of a single node within a run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    pub node_id: NodeId,
    pub operator: String,
    pub status: NodeStatus,
    /// Execution time in milliseconds (0 if never finished).
    pub elapsed_ms: u64,
}

/// Result of executing an entire graph.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub run_id: RunId,
    /// The final state, with every result and error entry written.
    pub state: WorkflowState,
    /// Per-node outcomes in graph insertion order.
    pub outcomes: Vec<NodeOutcome>,
    /// Whether every node succeeded.
    pub succeeded: bool,
    pub cancelled: bool,
    pub total_elapsed_ms: u64,
}

impl ExecutionReport {
    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| o.node_id.as_str() == node_id)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Scheduling policy for the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Launch nothing new after the first failure.
    pub abort_on_error: bool,
    /// Maximum nodes in flight at once (0 = unlimited).
    pub max_concurrency: usize,
    /// Timeout for operators that do not declare their own.
    pub node_timeout_secs: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            abort_on_error: config.abort_on_error,
            max_concurrency: config.max_concurrency,
            node_timeout_secs: config.node_timeout_secs,
        }
    }
}

/// Executes workflow graphs.
///
/// Nodes are launched as soon as all their predecessors have succeeded, so
/// independent branches run concurrently up to `max_concurrency`. Each
/// handler receives a snapshot of the state attached to its node; only the
/// node's own result slot is merged back.
pub struct WorkflowEngine {
    options: EngineOptions,
    events: Option<Arc<EventBus>>,
}

impl WorkflowEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            events: None,
        }
    }

    /// Publish progress events to `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run the graph to completion and return the final state.
    ///
    /// Node failures never escape as errors; inspect `state.errors()`.
    pub async fn run(&self, graph: &WorkflowGraph, state: WorkflowState) -> WorkflowState {
        self.run_with_cancel(graph, state, &CancellationToken::new())
            .await
    }

    /// Like `run`, stopping early when `cancel` fires. Nodes interrupted or
    /// left ready by the cancellation get a `Cancelled` error entry.
    pub async fn run_with_cancel(
        &self,
        graph: &WorkflowGraph,
        state: WorkflowState,
        cancel: &CancellationToken,
    ) -> WorkflowState {
        self.execute(graph, state, cancel).await.state
    }

    /// Run the graph and return the full per-node report.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        state: WorkflowState,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let start = Instant::now();
        let mut run = Run::new(self, graph, state);

        info!(run_id = %run.run_id, nodes = graph.len(), "Workflow run started");
        self.emit(WorkflowEvent::RunStarted {
            run_id: run.run_id.clone(),
            nodes: graph.len(),
        });

        let limit = match self.options.max_concurrency {
            0 => usize::MAX,
            n => n,
        };
        let mut in_flight: FuturesUnordered<BoxFuture<'static, NodeRun>> = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            while !run.halted && in_flight.len() < limit {
                let Some(index) = run.ready.pop_first() else {
                    break;
                };
                in_flight.push(run.launch(index));
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                Some(done) = in_flight.next() => run.settle(done),
            }
        }

        // Dropping unfinished invocations is how they observe cancellation.
        drop(in_flight);
        if cancelled {
            warn!(run_id = %run.run_id, "Workflow run cancelled");
            run.cancel_outstanding();
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        let succeeded = !cancelled && run.status.iter().all(|s| *s == NodeStatus::Succeeded);

        info!(
            run_id = %run.run_id,
            succeeded,
            errors = run.state.errors().len(),
            total_elapsed_ms,
            "Workflow run finished"
        );
        self.emit(WorkflowEvent::RunFinished {
            run_id: run.run_id.clone(),
            succeeded,
            elapsed_ms: total_elapsed_ms,
        });

        run.into_report(succeeded, cancelled, total_elapsed_ms)
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// A finished node invocation.
struct NodeRun {
    index: usize,
    outcome: Result<WorkflowState, Failure>,
    elapsed_ms: u64,
}

struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Failed,
            message: message.into(),
        }
    }
}

/// Bookkeeping for one in-progress run.
struct Run<'a> {
    engine: &'a WorkflowEngine,
    graph: &'a WorkflowGraph,
    run_id: RunId,
    state: WorkflowState,
    status: Vec<NodeStatus>,
    elapsed: Vec<u64>,
    /// Predecessors each node is still waiting on.
    waiting: Vec<usize>,
    ready: BTreeSet<usize>,
    /// Set after a failure under `abort_on_error`.
    halted: bool,
}

impl<'a> Run<'a> {
    fn new(engine: &'a WorkflowEngine, graph: &'a WorkflowGraph, mut state: WorkflowState) -> Self {
        state.detach();
        let waiting: Vec<usize> = (0..graph.len())
            .map(|i| graph.predecessor_indices(i).len())
            .collect();
        let ready = (0..graph.len()).filter(|&i| waiting[i] == 0).collect();
        Self {
            engine,
            graph,
            run_id: RunId::new(),
            state,
            status: vec![NodeStatus::Pending; graph.len()],
            elapsed: vec![0; graph.len()],
            waiting,
            ready,
            halted: false,
        }
    }

    fn launch(&mut self, index: usize) -> BoxFuture<'static, NodeRun> {
        let graph = self.graph;
        let node = graph.node_at(index);
        let node_id = node.id.clone();
        let operator = node.operator();
        let timeout = operator
            .timeout_secs()
            .or(self.engine.options.node_timeout_secs);

        let mut snapshot = self.state.clone();
        snapshot.attach(NodeCursor {
            node_id: node_id.clone(),
            predecessors: graph
                .predecessor_indices(index)
                .iter()
                .map(|&p| graph.node_at(p).id.clone())
                .collect(),
        });

        self.status[index] = NodeStatus::Running;
        debug!(node_id = %node_id, operator = %node.operator_name(), "Launching node");
        self.engine.emit(WorkflowEvent::NodeStarted {
            run_id: self.run_id.clone(),
            node_id: node_id.clone(),
            operator: node.operator_name().to_string(),
        });

        Box::pin(async move {
            let started = Instant::now();
            let call = AssertUnwindSafe(async move { operator.execute(snapshot).await }).catch_unwind();
            let outcome = match timeout {
                Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), call).await {
                    Ok(result) => flatten(result),
                    Err(_) => Err(Failure {
                        kind: FailureKind::TimedOut,
                        message: OpflowError::OperatorTimeout {
                            node_id: node_id.to_string(),
                            timeout_secs: secs,
                        }
                        .to_string(),
                    }),
                },
                None => flatten(call.await),
            };
            NodeRun {
                index,
                outcome,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        })
    }

    fn settle(&mut self, done: NodeRun) {
        let NodeRun {
            index,
            outcome,
            elapsed_ms,
        } = done;
        let graph = self.graph;
        let node = graph.node_at(index);
        self.elapsed[index] = elapsed_ms;

        match outcome.and_then(|returned| self.own_result(index, returned)) {
            Ok(value) => {
                self.state.insert_result(node.id.clone(), value);
                self.status[index] = NodeStatus::Succeeded;
                debug!(node_id = %node.id, elapsed_ms, "Node succeeded");
                self.engine.emit(WorkflowEvent::NodeSucceeded {
                    run_id: self.run_id.clone(),
                    node_id: node.id.clone(),
                    elapsed_ms,
                });
                self.release_successors(index);
            }
            Err(failure) => {
                error!(node_id = %node.id, error = %failure.message, "Workflow node failed");
                self.engine.emit(WorkflowEvent::NodeFailed {
                    run_id: self.run_id.clone(),
                    node_id: node.id.clone(),
                    error: failure.message.clone(),
                });
                self.state.insert_error(
                    node.id.clone(),
                    NodeFailure::new(node.operator_name(), failure.kind, failure.message),
                );
                self.status[index] = NodeStatus::Failed;

                if self.engine.options.abort_on_error {
                    if !self.halted {
                        warn!(node_id = %node.id, "Aborting run: no further nodes will be launched");
                    }
                    self.halted = true;
                } else {
                    self.skip_descendants(index);
                }
            }
        }
    }

    /// Take the node's own slot from the returned state, rejecting any other
    /// change to result or error entries.
    fn own_result(&self, index: usize, returned: WorkflowState) -> Result<serde_json::Value, Failure> {
        let own = &self.graph.node_at(index).id;

        for (id, value) in returned.node_results() {
            if id != own && self.state.result(id.as_str()) != Some(value) {
                return Err(Failure::failed(
                    OpflowError::node(
                        own.clone(),
                        format!("contract violation: wrote result slot of node '{}'", id),
                    )
                    .to_string(),
                ));
            }
        }
        for id in returned.errors().keys() {
            if self.state.error(id.as_str()).is_none() {
                return Err(Failure::failed(
                    OpflowError::node(
                        own.clone(),
                        format!("contract violation: wrote error entry of node '{}'", id),
                    )
                    .to_string(),
                ));
            }
        }

        Ok(returned
            .result(own.as_str())
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    fn release_successors(&mut self, index: usize) {
        let graph = self.graph;
        for &next in graph.successor_indices(index) {
            self.waiting[next] -= 1;
            if self.waiting[next] == 0 && self.status[next] == NodeStatus::Pending {
                self.ready.insert(next);
            }
        }
    }

    fn skip_descendants(&mut self, index: usize) {
        let graph = self.graph;
        let mut stack = graph.successor_indices(index).to_vec();
        while let Some(next) = stack.pop() {
            if self.status[next] != NodeStatus::Pending {
                continue;
            }
            self.status[next] = NodeStatus::Skipped;
            self.ready.remove(&next);
            let node_id = graph.node_at(next).id.clone();
            debug!(node_id = %node_id, "Skipping node downstream of failure");
            self.engine.emit(WorkflowEvent::NodeSkipped {
                run_id: self.run_id.clone(),
                node_id,
            });
            stack.extend_from_slice(graph.successor_indices(next));
        }
    }

    fn cancel_outstanding(&mut self) {
        let graph = self.graph;
        for index in 0..graph.len() {
            // A halted run never launches its ready nodes, so they stay pending.
            let ready = !self.halted && self.ready.contains(&index);
            if self.status[index] != NodeStatus::Running && !ready {
                continue;
            }
            let node = graph.node_at(index);
            self.status[index] = NodeStatus::Cancelled;
            self.state
                .insert_error(node.id.clone(), NodeFailure::cancelled(node.operator_name()));
            self.engine.emit(WorkflowEvent::NodeCancelled {
                run_id: self.run_id.clone(),
                node_id: node.id.clone(),
            });
        }
        self.ready.clear();
    }

    fn into_report(self, succeeded: bool, cancelled: bool, total_elapsed_ms: u64) -> ExecutionReport {
        let outcomes = self
            .graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| NodeOutcome {
                node_id: node.id.clone(),
                operator: node.operator_name().to_string(),
                status: self.status[i],
                elapsed_ms: self.elapsed[i],
            })
            .collect();

        ExecutionReport {
            run_id: self.run_id,
            state: self.state,
            outcomes,
            succeeded,
            cancelled,
            total_elapsed_ms,
        }
    }
}

fn flatten(
    result: std::thread::Result<opflow_core::Result<WorkflowState>>,
) -> Result<WorkflowState, Failure> {
    match result {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(e)) => Err(Failure::failed(e.to_string())),
        Err(panic) => Err(Failure::failed(format!(
            "operator panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
