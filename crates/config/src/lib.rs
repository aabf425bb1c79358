//! Configuration loading, validation, and management for VertexCare.
//!
//! Loads configuration from `~/.vertexcare/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vertexcare_core::LoopPolicy;

/// The root configuration structure.
///
/// Maps directly to `~/.vertexcare/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Loop policy handed to every new session
    #[serde(default)]
    pub agent: LoopPolicy,

    /// Which reasoning engine drives the loop
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Where tool adapters get their data
    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

// ── Reasoning ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEngineKind {
    /// Deterministic predict → explain → notes → finish strategy
    #[default]
    Rules,
    /// OpenAI-compatible chat completions endpoint
    Llm,
}

impl std::str::FromStr for ReasoningEngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rules" => Ok(Self::Rules),
            "llm" => Ok(Self::Llm),
            other => Err(ConfigError::ValidationError(format!(
                "unknown reasoning engine '{other}' (expected 'rules' or 'llm')"
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub engine: ReasoningEngineKind,

    /// API key for the LLM endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            engine: ReasoningEngineKind::default(),
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ReasoningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningConfig")
            .field("engine", &self.engine)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

// ── Collaborators ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorBackend {
    /// In-process patient records (built-in demo set or a JSON file)
    #[default]
    Fixture,
    /// HTTP model/notes services
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    #[serde(default)]
    pub backend: CollaboratorBackend,

    /// JSON file of patient records; the built-in demo set when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixtures_path: Option<PathBuf>,

    /// Base URL of the remote services
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:9000".into()
}
fn default_request_timeout_ms() -> u64 {
    5_000
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            backend: CollaboratorBackend::default(),
            fixtures_path: None,
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Overall deadline for one `run` request when the caller gives none
    #[serde(default = "default_run_deadline_ms")]
    pub run_deadline_ms: u64,

    /// How long a finished session stays queryable before it is dropped
    #[serde(default = "default_session_retention_ms")]
    pub session_retention_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_run_deadline_ms() -> u64 {
    120_000
}
fn default_session_retention_ms() -> u64 {
    600_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            run_deadline_ms: default_run_deadline_ms(),
            session_retention_ms: default_session_retention_ms(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.vertexcare/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `VERTEXCARE_API_KEY` (falls back to `OPENAI_API_KEY`)
    /// - `VERTEXCARE_REASONING_ENGINE`
    /// - `VERTEXCARE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let has_key = self.reasoning.api_key.is_some();
        let key = lookup("VERTEXCARE_API_KEY").or_else(|| {
            if has_key {
                None
            } else {
                lookup("OPENAI_API_KEY")
            }
        });
        if key.is_some() {
            self.reasoning.api_key = key;
        }

        if let Some(engine) = lookup("VERTEXCARE_REASONING_ENGINE") {
            self.reasoning.engine = engine.parse()?;
        }

        if let Some(model) = lookup("VERTEXCARE_MODEL") {
            self.reasoning.model = model;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".vertexcare")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let agent = &self.agent;
        if agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }
        if agent.reasoning_timeout_ms == 0 || agent.tool_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be > 0".into(),
            ));
        }
        if let Some((tool, _)) = agent.tool_timeouts.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::ValidationError(format!(
                "agent.tool_timeouts.{tool} must be > 0"
            )));
        }
        if agent.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "agent.retry.multiplier must be >= 1.0".into(),
            ));
        }
        if agent.retry.initial_backoff_ms > agent.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "agent.retry.initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.reasoning.temperature) {
            return Err(ConfigError::ValidationError(
                "reasoning.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.reasoning.engine == ReasoningEngineKind::Llm
            && self.reasoning.api_url.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "reasoning.api_url is required for the llm engine".into(),
            ));
        }

        if self.collaborators.backend == CollaboratorBackend::Remote
            && self.collaborators.base_url.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "collaborators.base_url is required for the remote backend".into(),
            ));
        }
        if self.collaborators.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "collaborators.request_timeout_ms must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.reasoning.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_steps, 5);
        assert_eq!(config.reasoning.engine, ReasoningEngineKind::Rules);
        assert_eq!(config.collaborators.backend, CollaboratorBackend::Fixture);
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent, config.agent);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.agent.max_steps, 5);
    }

    #[test]
    fn load_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[agent]
max_steps = 8
tool_timeout_ms = 2500

[agent.tool_timeouts]
fetch_notes = 750

[agent.retry]
max_retries = 1

[reasoning]
engine = "llm"
model = "local-model"

[collaborators]
backend = "remote"
base_url = "http://models.internal:9000"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.agent.max_steps, 8);
        assert_eq!(config.agent.tool_timeout_ms, 2500);
        assert_eq!(config.agent.tool_timeouts["fetch_notes"], 750);
        assert_eq!(config.agent.retry.max_retries, 1);
        assert_eq!(config.agent.retry.initial_backoff_ms, 200);
        assert_eq!(config.reasoning.engine, ReasoningEngineKind::Llm);
        assert_eq!(config.reasoning.model, "local-model");
        assert_eq!(config.collaborators.backend, CollaboratorBackend::Remote);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.session_retention_ms, 600_000);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nmax_steps = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reasoning.temperature = 5.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.agent.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.agent.tool_timeouts.insert("explain".into(), 0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.collaborators.backend = CollaboratorBackend::Remote;
        config.collaborators.base_url = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("VERTEXCARE_API_KEY", "sk-test"),
                ("VERTEXCARE_REASONING_ENGINE", "LLM"),
                ("VERTEXCARE_MODEL", "gpt-test"),
            ]))
            .unwrap();
        assert_eq!(config.reasoning.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.reasoning.engine, ReasoningEngineKind::Llm);
        assert_eq!(config.reasoning.model, "gpt-test");
        assert!(config.has_api_key());
    }

    #[test]
    fn openai_key_only_fills_missing_key() {
        let mut config = AppConfig::default();
        config.reasoning.api_key = Some("from-file".into());
        config
            .apply_env(env(&[("OPENAI_API_KEY", "from-env")]))
            .unwrap();
        assert_eq!(config.reasoning.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn unknown_engine_in_env_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("VERTEXCARE_REASONING_ENGINE", "oracle")]))
            .unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.reasoning.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_steps = 5"));
        assert!(toml_str.contains("[agent.retry]"));
        assert!(toml_str.contains("engine = \"rules\""));
        assert!(toml_str.contains("session_retention_ms = 600000"));
    }
}
