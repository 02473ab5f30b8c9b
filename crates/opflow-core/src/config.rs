use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OpflowError, Result};

/// Top-level opflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub datasource: DataSourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: String::new(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

impl ModelConfig {
    /// Copy of this config with the API key replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api_key.is_some() {
            copy.api_key = Some("***".to_string());
        }
        copy
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Execution engine policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stop launching nodes after the first failure (default: true).
    #[serde(default = "default_abort_on_error")]
    pub abort_on_error: bool,
    /// Maximum nodes in flight at once (0 = unlimited).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Timeout applied to operators that do not declare their own.
    #[serde(default)]
    pub node_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            abort_on_error: default_abort_on_error(),
            max_concurrency: default_max_concurrency(),
            node_timeout_secs: None,
        }
    }
}

fn default_abort_on_error() -> bool { true }
fn default_max_concurrency() -> usize { 4 }

/// Context handed to the plan producer and the sql operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Inline description of the tables and columns available.
    #[serde(default)]
    pub schema: String,
    /// File to read the schema from when `schema` is empty.
    #[serde(default)]
    pub schema_file: Option<String>,
    /// Free-text columns eligible for semantic operators.
    #[serde(default)]
    pub semantic_fields: Vec<String>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            schema: String::new(),
            schema_file: None,
            semantic_fields: vec![],
            max_steps: default_max_steps(),
        }
    }
}

fn default_max_steps() -> usize { 8 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    #[serde(default)]
    pub sqlite_path: Option<String>,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            max_rows: default_max_rows(),
        }
    }
}

fn default_max_rows() -> usize { 200 }

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "opflow.toml";

impl AppConfig {
    /// Load `path`, treating a missing file as an error only when the path
    /// was chosen explicitly. Returns `None` for an absent implicit file.
    pub fn load_from(path: &Path, explicit: bool) -> Result<Option<Self>> {
        if !explicit && !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Defaults with the model taken from `OPFLOW_MODEL`, `OPENAI_API_KEY`
    /// and `OPENAI_BASE_URL`.
    pub fn from_env() -> Self {
        Self {
            model: ModelConfig {
                model_id: std::env::var("OPFLOW_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                api_key: std::env::var("OPENAI_API_KEY").ok(),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
                ..ModelConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| OpflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let mut config: AppConfig =
            toml::from_str(&expanded).map_err(|e| OpflowError::Config(e.to_string()))?;
        config.resolve_schema(path.parent())?;
        Ok(config)
    }

    /// Fill `planner.schema` from `planner.schema_file` when it is empty.
    /// Relative paths resolve against the config file's directory.
    fn resolve_schema(&mut self, base: Option<&Path>) -> Result<()> {
        if !self.planner.schema.trim().is_empty() {
            return Ok(());
        }
        let Some(file) = self.planner.schema_file.as_deref() else {
            return Ok(());
        };
        let mut path = PathBuf::from(file);
        if path.is_relative() {
            if let Some(base) = base {
                path = base.join(path);
            }
        }
        self.planner.schema = std::fs::read_to_string(&path).map_err(|e| {
            OpflowError::Config(format!("schema_file {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_OPFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_OPFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_OPFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_OPFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_OPFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.model.provider, "openai");
        assert!(config.model.model_id.is_empty());
        assert!(config.engine.abort_on_error);
        assert_eq!(config.engine.max_concurrency, 4);
        assert_eq!(config.planner.max_steps, 8);
        assert_eq!(config.datasource.max_rows, 200);
        assert!(config.datasource.sqlite_path.is_none());
    }

    #[test]
    fn test_engine_overrides() {
        let toml_str = r#"
[engine]
abort_on_error = false
max_concurrency = 0
node_timeout_secs = 45
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.engine.abort_on_error);
        assert_eq!(config.engine.max_concurrency, 0);
        assert_eq!(config.engine.node_timeout_secs, Some(45));
    }

    #[test]
    fn test_schema_file_resolved_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schema.txt"), "orders(id, region, body)").unwrap();
        let config_path = dir.path().join("opflow.toml");
        std::fs::write(&config_path, "[planner]\nschema_file = \"schema.txt\"\n").unwrap();

        let config = AppConfig::load(&config_path).unwrap();
        assert_eq!(config.planner.schema, "orders(id, region, body)");
    }

    #[test]
    fn test_redacted_hides_key() {
        let model = ModelConfig {
            api_key: Some("sk-secret".into()),
            ..ModelConfig::default()
        };
        assert_eq!(model.redacted().api_key.as_deref(), Some("***"));
        assert_eq!(model.api_key.as_deref(), Some("sk-secret"));
    }
}
