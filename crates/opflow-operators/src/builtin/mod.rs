//! Built-in operator set.
//!
//! Every operator here takes its collaborators explicitly through
//! [`OperatorDeps`]; nothing reaches for a global client.

pub mod mask;
pub mod semantic;
pub mod sql;

use std::sync::Arc;

use opflow_core::config::ModelConfig;
use opflow_core::error::Result;
use opflow_core::traits::{LlmClient, QueryExecutor};

use crate::registry::OperatorRegistryBuilder;

/// Upstream payloads longer than this are cut before being sent to the LLM.
const MAX_PROMPT_PAYLOAD_CHARS: usize = 24_000;

/// Collaborators shared by the built-in operators.
#[derive(Clone)]
pub struct OperatorDeps {
    pub llm: Arc<dyn LlmClient>,
    pub model: ModelConfig,
    pub datasource: Option<Arc<dyn QueryExecutor>>,
    /// Schema description used for text-to-SQL.
    pub schema: String,
    pub max_rows: usize,
}

impl OperatorDeps {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        Self {
            llm,
            model,
            datasource: None,
            schema: String::new(),
            max_rows: 200,
        }
    }

    pub fn with_datasource(mut self, datasource: Arc<dyn QueryExecutor>) -> Self {
        self.datasource = Some(datasource);
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }
}

pub(crate) fn register_all(builder: &mut OperatorRegistryBuilder, deps: OperatorDeps) -> Result<()> {
    builder.register_operator(sql::SqlOperator::new(&deps))?;
    for kind in semantic::SemanticKind::ALL {
        builder.register_operator(semantic::SemanticOperator::new(kind, &deps))?;
    }
    builder.register_operator(mask::MaskOperator::new()?)?;
    Ok(())
}

/// Strip a surrounding Markdown code fence (```lang ... ```), if any.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse an LLM reply as JSON, falling back to the trimmed text.
pub(crate) fn parse_reply(reply: &str) -> serde_json::Value {
    let body = strip_code_fence(reply);
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string()))
}

/// Render a payload for a prompt, cut to a bounded length.
pub(crate) fn prompt_payload(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::Null => return "(none)".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= MAX_PROMPT_PAYLOAD_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(MAX_PROMPT_PAYLOAD_CHARS).collect();
    cut.push_str("\n...[truncated]");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_test_utils::MockLlmClient;
    use serde_json::json;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("```\n[1, 2]\n```\n"), "[1, 2]");
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("```json\n{\"a\": 1}\n```"), json!({"a": 1}));
        assert_eq!(parse_reply("not json"), json!("not json"));
    }

    #[test]
    fn test_prompt_payload() {
        assert_eq!(prompt_payload(&serde_json::Value::Null), "(none)");
        assert_eq!(prompt_payload(&json!("text")), "text");
        let long = json!("x".repeat(MAX_PROMPT_PAYLOAD_CHARS + 10));
        assert!(prompt_payload(&long).ends_with("...[truncated]"));
    }

    #[test]
    fn test_register_all_names() {
        let deps = OperatorDeps::new(Arc::new(MockLlmClient::new(vec![])), ModelConfig::default());
        let registry = OperatorRegistryBuilder::with_builtins(deps).unwrap().build();
        let names: Vec<String> = registry.list().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "classify",
                "cluster",
                "extract",
                "mask",
                "semantic_filter",
                "similarity_search",
                "sql",
                "summarize",
            ]
        );
    }
}
