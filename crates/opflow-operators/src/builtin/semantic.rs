use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use opflow_core::config::ModelConfig;
use opflow_core::error::Result;
use opflow_core::traits::{LlmClient, Operator};
use opflow_core::types::{ChatMessage, WorkflowState};

use super::{parse_reply, prompt_payload, OperatorDeps};

/// The LLM-backed operators. They differ only in their task description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticKind {
    Classify,
    SemanticFilter,
    Extract,
    Cluster,
    Summarize,
    SimilaritySearch,
}

impl SemanticKind {
    pub const ALL: [SemanticKind; 6] = [
        SemanticKind::Classify,
        SemanticKind::SemanticFilter,
        SemanticKind::Extract,
        SemanticKind::Cluster,
        SemanticKind::Summarize,
        SemanticKind::SimilaritySearch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::SemanticFilter => "semantic_filter",
            Self::Extract => "extract",
            Self::Cluster => "cluster",
            Self::Summarize => "summarize",
            Self::SimilaritySearch => "similarity_search",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Classify => "Classify the values of a free-text column into categories",
            Self::SemanticFilter => "Keep only records whose free text is semantically related to a topic",
            Self::Extract => "Extract named entities or fields from free-text records",
            Self::Cluster => "Group records into clusters of similar content",
            Self::Summarize => "Summarize upstream results into a short answer",
            Self::SimilaritySearch => "Find the records most similar to a reference text",
        }
    }

    fn task(self) -> &'static str {
        match self {
            Self::Classify => {
                "Assign each input record a category. Return a JSON array of \
                 {\"record\": <index or id>, \"category\": <string>}."
            }
            Self::SemanticFilter => {
                "Decide for each input record whether it matches the instruction. \
                 Return a JSON array containing only the matching records, unchanged."
            }
            Self::Extract => {
                "Extract the requested entities from each input record. Return a JSON \
                 array of objects, one per record, holding the extracted fields."
            }
            Self::Cluster => {
                "Group the input records into clusters. Return a JSON array of \
                 {\"label\": <string>, \"members\": [<index or id>...]}."
            }
            Self::Summarize => {
                "Answer the original request from the input data. Return a JSON object \
                 {\"summary\": <string>}."
            }
            Self::SimilaritySearch => {
                "Rank the input records by similarity to the reference in the instruction. \
                 Return a JSON array of the best matches, most similar first."
            }
        }
    }
}

pub struct SemanticOperator {
    kind: SemanticKind,
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
}

impl SemanticOperator {
    pub fn new(kind: SemanticKind, deps: &OperatorDeps) -> Self {
        Self {
            kind,
            llm: deps.llm.clone(),
            model: deps.model.clone(),
        }
    }

    fn messages(&self, query: &str, instruction: &str, upstream: &serde_json::Value) -> Vec<ChatMessage> {
        let system = format!(
            "You are the `{}` operator in a data-processing pipeline.\n{}\n\
             Respond with JSON only, no commentary.",
            self.kind.name(),
            self.kind.task()
        );
        let user = format!(
            "Original request: {}\n\nInstruction: {}\n\nInput data:\n{}",
            query,
            instruction,
            prompt_payload(upstream)
        );
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

impl Operator for SemanticOperator {
    fn name(&self) -> &str {
        self.kind.name()
    }
    fn description(&self) -> &str {
        self.kind.description()
    }
    fn timeout_secs(&self) -> Option<u64> {
        Some(120)
    }
    fn execute(&self, state: WorkflowState) -> BoxFuture<'_, Result<WorkflowState>> {
        Box::pin(async move {
            let mut state = state;
            let node_id = state.current_node()?.clone();
            let instruction = state.current_instruction()?.to_string();
            let upstream = state.upstream_payload()?;

            debug!(node_id = %node_id, operator = self.kind.name(), "Calling LLM");
            let messages = self.messages(state.original_query(), &instruction, &upstream);
            let reply = self.llm.complete(&self.model, messages).await?;

            state.set_result(parse_reply(&reply))?;
            Ok(state)
        })
    }
}
