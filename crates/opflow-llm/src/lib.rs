pub mod providers;
pub mod retry;

use tracing::warn;

use opflow_core::config::ModelConfig;
use opflow_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Default API base for providers that speak the OpenAI chat protocol.
fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some(providers::openai::OPENAI_API_BASE),
        "dashscope" => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        _ => None,
    }
}

fn provider_client(config: &ModelConfig) -> OpenAiClient {
    let client = OpenAiClient::new();
    match default_base_url(&config.provider) {
        Some(base) => client.with_default_base(base),
        None => {
            if config.base_url.is_none() {
                warn!(provider = %config.provider, "Unknown provider without base_url, using the OpenAI endpoint");
            }
            client
        }
    }
}

/// Create an LLM client for the configured provider, wrapped in a
/// `RetryingClient` when `[model.retry]` is set.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    let client: Box<dyn LlmClient> = Box::new(provider_client(config));

    match &config.retry {
        Some(retry) => Box::new(RetryingClient::new(client, retry.clone())),
        None => client,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.into(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_provider_default_base() {
        assert_eq!(
            provider_client(&model("dashscope")).default_base(),
            "https://dashscope.aliyuncs.com/compatible-mode/v1"
        );
        assert_eq!(provider_client(&model("ollama")).default_base(), "http://localhost:11434/v1");
        assert_eq!(provider_client(&model("openai")).default_base(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_unknown_provider_falls_back_to_openai() {
        assert_eq!(provider_client(&model("acme")).default_base(), "https://api.openai.com/v1");
    }
}
