//! Configuration loading.
//!
//! Settings come from `courier.toml`, with environment variables taking
//! precedence for secrets (`COURIER_LLM_API_KEY`, `COURIER_EMBED_API_KEY`,
//! `COURIER_ALLOWED_SENDERS`).

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::ConfigError;

/// Which messages are written into the retrieval index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPolicy {
    /// Index inbound messages only.
    #[default]
    InboundOnly,
    /// Index inbound messages and the assistant's own replies.
    All,
}

/// Bridge subprocess settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Program to spawn, e.g. "node".
    pub program: String,
    /// Arguments, e.g. ["bridge.js"].
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds to wait for a correlated response before a send fails.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Reasoning provider settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Retry attempts when the provider rate-limits.
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

/// Agent loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Senders allowed to drive the assistant (normalized phone numbers).
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    /// Max reasoning<->tool round trips per inbound message.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Hard cap on retained conversation turns per participant.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    /// Approximate token budget for retained history.
    #[serde(default = "default_token_budget")]
    pub max_token_budget: usize,
    /// How many similar prior messages to attach as context.
    #[serde(default = "default_context_results")]
    pub context_results: usize,
    #[serde(default)]
    pub index_policy: IndexPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_agent_config")]
    pub agent: AgentConfig,
    /// IANA timezone used when scheduling wall-clock recurrences.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Directory for the sqlite stores.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_llm_retries() -> u32 {
    3
}

fn default_max_tool_rounds() -> u32 {
    5
}

fn default_max_history_turns() -> usize {
    30
}

fn default_token_budget() -> usize {
    16_000
}

fn default_context_results() -> usize {
    5
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_agent_config() -> AgentConfig {
    AgentConfig {
        allowed_senders: Vec::new(),
        max_tool_rounds: default_max_tool_rounds(),
        max_history_turns: default_max_history_turns(),
        max_token_budget: default_token_budget(),
        context_results: default_context_results(),
        index_policy: IndexPolicy::default(),
    }
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        config.apply_env();
        config.parsed_timezone()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("COURIER_LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Ok(key) = std::env::var("COURIER_EMBED_API_KEY") {
            self.embedding.api_key = key;
        }
        if let Ok(senders) = std::env::var("COURIER_ALLOWED_SENDERS") {
            self.agent.allowed_senders = senders
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    /// Resolve the configured timezone name.
    pub fn parsed_timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let text = r#"
            timezone = "Europe/Rome"

            [bridge]
            program = "node"
            args = ["bridge.js"]

            [llm]
            base_url = "https://api.example.com/v1"
            model = "test-model"

            [embedding]
            base_url = "https://api.example.com/v1"
            model = "test-embed"
        "#;

        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.bridge.request_timeout_secs, 30);
        assert_eq!(config.agent.max_tool_rounds, 5);
        assert_eq!(config.agent.index_policy, IndexPolicy::InboundOnly);
        assert_eq!(config.parsed_timezone().unwrap(), chrono_tz::Europe::Rome);
    }

    #[test]
    fn rejects_unknown_timezone() {
        let text = r#"
            timezone = "Mars/Olympus"

            [bridge]
            program = "node"

            [llm]
            base_url = "https://api.example.com/v1"
            model = "m"

            [embedding]
            base_url = "https://api.example.com/v1"
            model = "e"
        "#;

        let config: Config = toml::from_str(text).unwrap();
        assert!(config.parsed_timezone().is_err());
    }
}
