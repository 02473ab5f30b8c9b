use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use opflow_core::config::ModelConfig;
use opflow_core::error::{OpflowError, Result};
use opflow_core::traits::LlmClient;
use opflow_core::types::ChatMessage;

pub(crate) const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible client. Works with OpenAI, DashScope compatible mode,
/// Ollama, vLLM, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    default_base: String,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            default_base: OPENAI_API_BASE.to_string(),
        }
    }

    /// Base URL used when `ModelConfig::base_url` is unset.
    pub fn with_default_base(mut self, base_url: impl Into<String>) -> Self {
        self.default_base = base_url.into();
        self
    }

    pub fn default_base(&self) -> &str {
        &self.default_base
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Full `/chat/completions` URL for `base_url` (default: OpenAI).
pub(crate) fn endpoint(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(OPENAI_API_BASE).trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

pub(crate) fn parse_response(body: &str) -> Result<String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| OpflowError::LlmParse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| OpflowError::LlmParse("response has no message content".into()))
}

fn request_error(e: reqwest::Error) -> OpflowError {
    if e.is_timeout() {
        OpflowError::LlmRequest(format!("timeout: {}", e))
    } else if e.is_connect() {
        OpflowError::LlmRequest(format!("connection error: {}", e))
    } else {
        OpflowError::LlmRequest(e.to_string())
    }
}

impl LlmClient for OpenAiClient {
    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let url = endpoint(Some(config.base_url.as_deref().unwrap_or(self.default_base.as_str())));
            let body = ChatRequest {
                model: &config.model_id,
                messages: &messages,
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                stream: false,
            };

            let mut req = self.http.post(&url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(url = %url, model = %config.model_id, messages = messages.len(), "Sending chat completion");
            let response = req.send().await.map_err(request_error)?;

            let status = response.status();
            let text = response.text().await.map_err(request_error)?;
            if !status.is_success() {
                return Err(OpflowError::LlmRequest(format!("HTTP {}: {}", status, text)));
            }

            parse_response(&text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        assert_eq!(endpoint(None), "https://api.openai.com/v1/chat/completions");
        assert_eq!(
            endpoint(Some("https://dashscope.aliyuncs.com/compatible-mode/v1/")),
            "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
        );
        assert_eq!(
            endpoint(Some("http://localhost:11434/v1/chat/completions")),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body() {
        let messages = vec![ChatMessage::system("You plan."), ChatMessage::user("count tickets")];
        let body = ChatRequest {
            model: "qwen-plus",
            messages: &messages,
            max_tokens: 512,
            temperature: 0.0,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "qwen-plus");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "count tickets");
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"[{\"op\":\"sql\"}]"},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_response(body).unwrap(), r#"[{"op":"sql"}]"#);
    }

    #[test]
    fn test_parse_response_without_content() {
        let err = parse_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, OpflowError::LlmParse(_)));
        assert!(parse_response("not json").is_err());
    }
}
