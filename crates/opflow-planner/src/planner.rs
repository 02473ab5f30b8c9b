use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use opflow_core::config::{AppConfig, ModelConfig};
use opflow_core::error::{OpflowError, Result};
use opflow_core::traits::{LlmClient, PlanProducer};
use opflow_core::types::{ChatMessage, OperatorDescriptor, Plan};

use crate::prompt::system_prompt;

/// Produces plans by asking an LLM to decompose the query.
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    schema: String,
    semantic_fields: Vec<String>,
    max_steps: usize,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        Self {
            llm,
            model,
            schema: String::new(),
            semantic_fields: vec![],
            max_steps: 8,
        }
    }

    /// Planner using the `[model]` and `[planner]` sections of `config`.
    pub fn from_config(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Self {
        Self::new(llm, config.model.clone())
            .with_schema(config.planner.schema.clone())
            .with_semantic_fields(config.planner.semantic_fields.clone())
            .with_max_steps(config.planner.max_steps)
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_semantic_fields(mut self, fields: Vec<String>) -> Self {
        self.semantic_fields = fields;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Parse an LLM reply into a plan.
    pub fn parse_plan(&self, reply: &str) -> Result<Plan> {
        let json = first_json_array(reply)
            .ok_or_else(|| OpflowError::PlanParse("reply contains no JSON array".into()))?;
        let plan: Plan = serde_json::from_str(json).map_err(|e| OpflowError::PlanParse(e.to_string()))?;
        if plan.len() > self.max_steps {
            return Err(OpflowError::PlanParse(format!(
                "plan has {} steps, limit is {}",
                plan.len(),
                self.max_steps
            )));
        }
        Ok(plan)
    }
}

/// The first balanced `[...]` in `text`, skipping brackets inside strings.
fn first_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

impl PlanProducer for LlmPlanner {
    fn produce<'a>(
        &'a self,
        query: &'a str,
        operators: &'a [OperatorDescriptor],
    ) -> BoxFuture<'a, Result<Plan>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(system_prompt(
                    operators,
                    &self.schema,
                    &self.semantic_fields,
                    self.max_steps,
                )),
                ChatMessage::user(query),
            ];

            let reply = self.llm.complete(&self.model, messages).await?;
            debug!(reply = %reply, "Planner reply");

            let plan = self.parse_plan(&reply).map_err(|e| {
                warn!(error = %e, "Could not parse operator plan");
                e
            })?;

            let known: Vec<&str> = operators.iter().map(|o| o.name.as_str()).collect();
            for (position, name) in plan.unresolved(|name| known.contains(&name)) {
                warn!(position, operator = %name, "Plan references an unknown operator");
            }

            info!(query = %query, steps = plan.len(), "Plan produced");
            Ok(plan)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_core::types::Role;
    use opflow_test_utils::MockLlmClient;

    fn catalog() -> Vec<OperatorDescriptor> {
        ["sql", "semantic_filter"]
            .into_iter()
            .map(|name| OperatorDescriptor {
                name: name.into(),
                description: format!("{} operator", name),
            })
            .collect()
    }

    fn planner_with(reply: &str) -> (LlmPlanner, Arc<MockLlmClient>) {
        let llm = Arc::new(MockLlmClient::new(vec![reply.to_string()]));
        let planner = LlmPlanner::new(llm.clone(), ModelConfig::default())
            .with_schema("tickets(id, type, district, body)")
            .with_semantic_fields(vec!["body".into()]);
        (planner, llm)
    }

    #[test]
    fn test_first_json_array() {
        assert_eq!(first_json_array("x [1, [2]] y [3]"), Some("[1, [2]]"));
        assert_eq!(first_json_array(r#"[{"i": "a ] b"}]"#), Some(r#"[{"i": "a ] b"}]"#));
        assert_eq!(first_json_array("no array"), None);
        assert_eq!(first_json_array("[unclosed"), None);
    }

    #[tokio::test]
    async fn test_produce_fenced_plan() {
        let reply = "Here is the plan:\n```json\n[\n  {\"op\": \"sql\", \"instruction\": \"tickets from the last 10 months\", \"input_fields\": [], \"output_fields\": []},\n  {\"op\": \"semantic_filter\", \"instruction\": \"keep garbage sorting complaints\", \"input_fields\": [\"body\"], \"output_fields\": [\"is_garbage\"]}\n]\n```";
        let (planner, llm) = planner_with(reply);

        let plan = planner
            .produce("where are garbage sorting complaints concentrated", &catalog())
            .await
            .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[1].operator_name, "semantic_filter");
        assert_eq!(plan.steps[1].output_fields, vec!["is_garbage"]);

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0].role, Role::System);
        assert!(requests[0][0].content.contains("- semantic_filter: semantic_filter operator"));
        assert!(requests[0][0].content.contains("tickets(id, type, district, body)"));
        assert_eq!(requests[0][1].content, "where are garbage sorting complaints concentrated");
    }

    #[tokio::test]
    async fn test_unknown_operator_kept_in_plan() {
        let (planner, _) = planner_with(r#"[{"op": "pivot", "instruction": "pivot by month"}]"#);
        let plan = planner.produce("q", &catalog()).await.unwrap();
        assert_eq!(plan.steps[0].operator_name, "pivot");
    }

    #[tokio::test]
    async fn test_malformed_reply_is_plan_parse_error() {
        let (planner, _) = planner_with("I cannot help with that.");
        let err = planner.produce("q", &catalog()).await.unwrap_err();
        assert!(matches!(err, OpflowError::PlanParse(_)));

        let (planner, _) = planner_with(r#"[{"instruction": "missing op"}]"#);
        assert!(matches!(planner.produce("q", &catalog()).await, Err(OpflowError::PlanParse(_))));
    }

    #[test]
    fn test_too_many_steps_rejected() {
        let (planner, _) = planner_with("");
        let planner = planner.with_max_steps(1);
        let err = planner
            .parse_plan(r#"[{"op": "sql"}, {"op": "sql"}]"#)
            .unwrap_err();
        assert!(err.to_string().contains("limit is 1"));
    }

    #[tokio::test]
    async fn test_empty_array_is_empty_plan() {
        let (planner, _) = planner_with("[]");
        assert!(planner.produce("q", &catalog()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_llm_errors_propagate() {
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let planner = LlmPlanner::new(llm, ModelConfig::default());
        let err = planner.produce("q", &catalog()).await.unwrap_err();
        assert!(matches!(err, OpflowError::LlmRequest(_)));
    }
}
