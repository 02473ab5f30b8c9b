use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use opflow_core::config::ModelConfig;
use opflow_core::error::{OpflowError, Result};
use opflow_core::traits::{LlmClient, Operator, QueryExecutor};
use opflow_core::types::{ChatMessage, WorkflowState};

use super::{prompt_payload, strip_code_fence, OperatorDeps};

/// Text-to-SQL followed by execution against the configured data source.
pub struct SqlOperator {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    datasource: Option<Arc<dyn QueryExecutor>>,
    schema: String,
    max_rows: usize,
}

impl SqlOperator {
    pub fn new(deps: &OperatorDeps) -> Self {
        Self {
            llm: deps.llm.clone(),
            model: deps.model.clone(),
            datasource: deps.datasource.clone(),
            schema: deps.schema.clone(),
            max_rows: deps.max_rows,
        }
    }

    fn messages(&self, query: &str, instruction: &str, upstream: &serde_json::Value) -> Vec<ChatMessage> {
        let schema = if self.schema.trim().is_empty() {
            "(not provided)"
        } else {
            self.schema.as_str()
        };
        let system = format!(
            "You translate data requests into exactly one read-only SQL query \
             (SELECT or WITH). Use only the tables and columns below.\n\n\
             ## Schema\n{}\n\nReply with the SQL statement only.",
            schema
        );
        let user = format!(
            "Original request: {}\n\nThis step: {}\n\nUpstream results:\n{}",
            query,
            instruction,
            prompt_payload(upstream)
        );
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

/// Pull the SQL statement out of an LLM reply.
fn extract_sql(reply: &str) -> String {
    strip_code_fence(reply).trim().trim_end_matches(';').trim().to_string()
}

/// Reject anything but a single SELECT/WITH statement.
fn ensure_read_only(sql: &str) -> Result<()> {
    let first = sql
        .split_whitespace()
        .next()
        .map(|w| w.to_ascii_lowercase())
        .unwrap_or_default();
    if first != "select" && first != "with" {
        return Err(OpflowError::DataSource(format!(
            "refusing non-read-only statement: {}",
            sql
        )));
    }
    if has_second_statement(sql) {
        return Err(OpflowError::DataSource(
            "refusing multiple statements".to_string(),
        ));
    }
    Ok(())
}

/// Whether a `;` outside quotes is followed by anything but whitespace.
fn has_second_statement(sql: &str) -> bool {
    let mut quote: Option<char> = None;
    for (i, ch) in sql.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                ';' if !sql[i + 1..].trim().is_empty() => return true,
                _ => {}
            },
        }
    }
    false
}

impl Operator for SqlOperator {
    fn name(&self) -> &str {
        "sql"
    }
    fn description(&self) -> &str {
        "Query structured data in the database with SQL"
    }
    fn timeout_secs(&self) -> Option<u64> {
        Some(120)
    }
    fn execute(&self, state: WorkflowState) -> BoxFuture<'_, Result<WorkflowState>> {
        Box::pin(async move {
            let mut state = state;
            let datasource = self
                .datasource
                .as_ref()
                .ok_or_else(|| OpflowError::DataSource("no data source configured".into()))?;

            let node_id = state.current_node()?.clone();
            let instruction = state.current_instruction()?.to_string();
            let upstream = state.upstream_payload()?;

            let messages = self.messages(state.original_query(), &instruction, &upstream);
            let reply = self.llm.complete(&self.model, messages).await?;
            let sql = extract_sql(&reply);
            ensure_read_only(&sql)?;
            debug!(node_id = %node_id, sql = %sql, "Executing generated SQL");

            let rows = datasource.query(&sql, self.max_rows).await?;
            let truncated = rows.truncated;
            info!(node_id = %node_id, rows = rows.rows.len(), truncated, "SQL step complete");

            state.set_result(serde_json::json!({
                "sql": sql,
                "columns": rows.columns,
                "rows": rows.rows,
                "truncated": truncated,
            }))?;
            Ok(state)
        })
    }
}
