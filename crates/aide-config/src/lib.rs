use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Locations searched when no explicit config path is given, in order.
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./aide.toml", "~/.config/aide/config.toml"];

/// Environment variable that overrides `provider.api_key`.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: None,
            api_version: None,
            max_tokens: default_max_tokens(),
        }
    }
}

/// Knobs that shape how the orchestration engine behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single capability-provider call
    pub tool_timeout_secs: u64,
    /// Idle time before an automatic turn is due
    pub quiescence_secs: u64,
    /// Report "item already absent" style provider failures as success for
    /// model-issued tool calls
    pub report_soft_failures_as_success: bool,
    /// Also scan assistant text for bracket-tag commands
    pub legacy_commands: bool,
    /// Number of recent turns summarised into the context preamble
    pub recent_turns: usize,
    /// Request/response rounds allowed per send before the loop stops
    pub max_tool_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 5,
            quiescence_secs: 300,
            report_soft_failures_as_success: true,
            legacy_commands: false,
            recent_turns: 10,
            max_tool_rounds: 8,
        }
    }
}

impl EngineConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_secs(self.quiescence_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Replaces the built-in instruction prompt when set
    pub system_prompt: Option<String>,
    /// Static location line for the context preamble
    pub location: Option<String>,
    /// Markdown file backing long-term memory
    pub memory_path: Option<String>,
    /// JSON file the performance tracker persists to
    pub stats_path: Option<String>,
}

impl AssistantConfig {
    pub fn memory_path(&self) -> PathBuf {
        resolve_data_path(self.memory_path.as_deref(), "memory.md")
    }

    pub fn stats_path(&self) -> PathBuf {
        resolve_data_path(self.stats_path.as_deref(), "stats.json")
    }
}

/// Expand a configured path, or fall back to `~/.config/aide/<file_name>`.
fn resolve_data_path(configured: Option<&str>, file_name: &str) -> PathBuf {
    if let Some(path) = configured {
        return PathBuf::from(shellexpand::tilde(path).as_ref());
    }
    dirs::home_dir()
        .map(|mut path| {
            path.push(".config");
            path.push("aide");
            path.push(file_name);
            path
        })
        .unwrap_or_else(|| PathBuf::from(file_name))
}

impl Config {
    /// Load from `config_path`, or the first default location that exists.
    /// Falls back to defaults when nothing is found.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path_to_load = match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    anyhow::bail!("Config file '{}' not found", path);
                }
                Some(path.to_string())
            }
            None => DEFAULT_CONFIG_PATHS.iter().find_map(|path| {
                let expanded_path = shellexpand::tilde(path);
                if Path::new(expanded_path.as_ref()).exists() {
                    Some(expanded_path.to_string())
                } else {
                    None
                }
            }),
        };

        let mut config = match path_to_load {
            Some(path) => {
                debug!("Loading configuration from {}", path);
                let config_content = std::fs::read_to_string(&path)?;
                toml::from_str::<Config>(&config_content)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.provider.api_key = key;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.provider.model.trim().is_empty() {
            anyhow::bail!("provider.model must not be empty");
        }
        if self.provider.max_tokens == 0 {
            anyhow::bail!("provider.max_tokens must be greater than zero");
        }
        if self.engine.tool_timeout_secs == 0 {
            anyhow::bail!("engine.tool_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}
