//! Configuration loading, validation, and management for forgeloop.
//!
//! Loads configuration from `~/.forgeloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.forgeloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model providers and retry policy
    #[serde(default)]
    pub llm: LlmConfig,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Context window budget
    #[serde(default)]
    pub context: ContextConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Which wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    OpenRouter,
    Ollama,
    /// Any OpenAI-compatible endpoint; requires `api_url`.
    Custom,
}

impl ProviderKind {
    /// Environment variable consulted when no key is configured.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Ollama | ProviderKind::Custom => None,
        }
    }

    /// Whether requests need an API key.
    pub fn requires_key(self) -> bool {
        !matches!(self, ProviderKind::Ollama | ProviderKind::Custom)
    }
}

/// One entry of the fallback chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub kind: ProviderKind,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ordered providers; the first is primary, the rest are fallbacks
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderEntry>,

    /// Attempts per provider for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries, doubled on each attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
}

fn default_providers() -> Vec<ProviderEntry> {
    vec![ProviderEntry {
        kind: ProviderKind::Anthropic,
        model: "claude-sonnet-4-5".into(),
        api_key: None,
        api_url: None,
        timeout_secs: default_timeout_secs(),
    }]
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_response_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: 0.0,
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Consecutive text-only turns tolerated before giving up
    #[serde(default = "default_max_text_responses")]
    pub max_text_responses: usize,

    /// How many recent tool outputs must share a name to count as stuck
    #[serde(default = "default_loop_detection_window")]
    pub loop_detection_window: usize,

    /// Apply approvable edits without asking
    #[serde(default)]
    pub auto_approve: bool,
}

fn default_max_iterations() -> usize {
    30
}

fn default_max_text_responses() -> usize {
    3
}

fn default_loop_detection_window() -> usize {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_text_responses: default_max_text_responses(),
            loop_detection_window: default_loop_detection_window(),
            auto_approve: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Model context window, in estimated tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Fraction of `max_tokens` at which pruning starts
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,

    /// Read results kept verbatim by proactive compression
    #[serde(default = "default_keep_recent")]
    pub keep_recent_tool_results: usize,
}

fn default_max_tokens() -> usize {
    150_000
}

fn default_prune_threshold() -> f64 {
    0.6
}

fn default_keep_recent() -> usize {
    3
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            prune_threshold: default_prune_threshold(),
            keep_recent_tool_results: default_keep_recent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Hard wall-clock limit for `bash`
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    /// Directory commands run in; defaults to the process cwd
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_shell_timeout() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout(),
            working_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.forgeloop/config.toml).
    ///
    /// Environment overrides, applied after the file:
    /// - `FORGELOOP_MODEL`: model of the primary provider
    /// - `FORGELOOP_MAX_ITERATIONS`
    /// - `FORGELOOP_AUTO_APPROVE` (`1`/`true`)
    /// - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `OPENROUTER_API_KEY`: fill
    ///   missing keys of matching providers
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(model) = env("FORGELOOP_MODEL")
            && let Some(primary) = self.llm.providers.first_mut()
        {
            primary.model = model;
        }

        if let Some(raw) = env("FORGELOOP_MAX_ITERATIONS") {
            match raw.parse() {
                Ok(n) => self.agent.max_iterations = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid FORGELOOP_MAX_ITERATIONS"),
            }
        }

        if let Some(raw) = env("FORGELOOP_AUTO_APPROVE") {
            self.agent.auto_approve =
                matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        for entry in &mut self.llm.providers {
            if entry.api_key.is_none()
                && let Some(var) = entry.kind.api_key_env()
            {
                entry.api_key = env(var);
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".forgeloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.providers.is_empty() {
            return Err(ConfigError::ValidationError(
                "llm.providers must list at least one provider".into(),
            ));
        }

        for entry in &self.llm.providers {
            if entry.model.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "provider {:?} has an empty model name",
                    entry.kind
                )));
            }
            if entry.kind == ProviderKind::Custom && entry.api_url.is_none() {
                return Err(ConfigError::ValidationError(
                    "custom providers require api_url".into(),
                ));
            }
        }

        if self.llm.temperature < 0.0 || self.llm.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        if self.context.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_tokens must be > 0".into(),
            ));
        }

        if !(self.context.prune_threshold > 0.0 && self.context.prune_threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "context.prune_threshold must be in (0.0, 1.0]".into(),
            ));
        }

        Ok(())
    }

    /// Providers that need a key but have none.
    pub fn providers_missing_keys(&self) -> Vec<&ProviderEntry> {
        self.llm
            .providers
            .iter()
            .filter(|p| p.kind.requires_key() && p.api_key.is_none())
            .collect()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let body = toml::to_string_pretty(&Self::default()).unwrap_or_default();
        format!(
            "# forgeloop configuration\n\
             # API keys may be left out and supplied via ANTHROPIC_API_KEY / OPENAI_API_KEY.\n\
             # Additional [[llm.providers]] entries act as fallbacks, tried in order.\n\n{body}"
        )
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_iterations, 30);
        assert_eq!(config.context.max_tokens, 150_000);
        assert!((config.context.prune_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.providers[0].kind, ProviderKind::Anthropic);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.providers.len(), 1);
        assert_eq!(parsed.agent.max_text_responses, config.agent.max_text_responses);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.context.prune_threshold = 1.5;
        assert!(config.validate().is_err());
        config.context.prune_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_provider_list_rejected() {
        let mut config = AppConfig::default();
        config.llm.providers.clear();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn custom_provider_needs_url() {
        let mut config = AppConfig::default();
        config.llm.providers[0].kind = ProviderKind::Custom;
        assert!(config.validate().is_err());
        config.llm.providers[0].api_url = Some("http://localhost:8080/v1".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.agent.max_iterations, 30);
    }

    #[test]
    fn parse_fallback_chain_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[llm]
max_retries = 2

[[llm.providers]]
kind = "anthropic"
model = "claude-sonnet-4-5"
api_key = "sk-ant-test"

[[llm.providers]]
kind = "openai"
model = "gpt-4o"
timeout_secs = 30

[agent]
max_iterations = 12
auto_approve = true
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.llm.providers.len(), 2);
        assert_eq!(config.llm.providers[1].kind, ProviderKind::OpenAi);
        assert_eq!(config.llm.providers[1].timeout_secs, 30);
        assert_eq!(config.llm.providers[0].timeout_secs, 120);
        assert_eq!(config.agent.max_iterations, 12);
        assert!(config.agent.auto_approve);
        assert_eq!(config.context.max_tokens, 150_000);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent\nmax_iterations = ").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env_from(&[
            ("FORGELOOP_MODEL", "claude-opus-4"),
            ("FORGELOOP_MAX_ITERATIONS", "7"),
            ("FORGELOOP_AUTO_APPROVE", "true"),
            ("ANTHROPIC_API_KEY", "sk-ant-env"),
        ]));
        assert_eq!(config.llm.providers[0].model, "claude-opus-4");
        assert_eq!(config.agent.max_iterations, 7);
        assert!(config.agent.auto_approve);
        assert_eq!(config.llm.providers[0].api_key.as_deref(), Some("sk-ant-env"));
        assert!(config.providers_missing_keys().is_empty());
    }

    #[test]
    fn env_key_does_not_replace_configured_key() {
        let mut config = AppConfig::default();
        config.llm.providers[0].api_key = Some("from-file".into());
        config.apply_env_overrides(env_from(&[("ANTHROPIC_API_KEY", "from-env")]));
        assert_eq!(config.llm.providers[0].api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn invalid_iteration_override_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env_from(&[("FORGELOOP_MAX_ITERATIONS", "lots")]));
        assert_eq!(config.agent.max_iterations, 30);
    }

    #[test]
    fn debug_redacts_keys() {
        let mut config = AppConfig::default();
        config.llm.providers[0].api_key = Some("sk-ant-secret".into());
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-ant-secret"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.starts_with("# forgeloop configuration"));
        assert!(toml_str.contains("anthropic"));
        assert!(toml::from_str::<AppConfig>(&toml_str).is_ok());
    }
}
