use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TetherError};

/// Top-level Tether configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Loop guards for the graph executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global per-run iteration ceiling.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// How many times in a row the same node may run before escalation.
    #[serde(default = "default_max_consecutive_same_node")]
    pub max_consecutive_same_node: u32,
    /// Retry bound for node kinds that do not set their own.
    #[serde(default = "default_retry_bound")]
    pub default_retry_bound: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_consecutive_same_node: default_max_consecutive_same_node(),
            default_retry_bound: default_retry_bound(),
        }
    }
}

pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
pub const DEFAULT_MAX_CONSECUTIVE_SAME_NODE: u32 = 10;
pub const DEFAULT_RETRY_BOUND: u32 = 3;

fn default_max_iterations() -> u32 { DEFAULT_MAX_ITERATIONS }
fn default_max_consecutive_same_node() -> u32 { DEFAULT_MAX_CONSECUTIVE_SAME_NODE }
fn default_retry_bound() -> u32 { DEFAULT_RETRY_BOUND }

/// Key-value store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. `~/` is expanded from `HOME`.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.tether/state.db".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "info".to_string() }

impl TetherConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TetherError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| TetherError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.max_iterations == 0 {
            return Err(TetherError::Config(
                "engine.max_iterations must be at least 1".into(),
            ));
        }
        if self.engine.max_consecutive_same_node == 0 {
            return Err(TetherError::Config(
                "engine.max_consecutive_same_node must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the store path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        let path = &self.store.path;
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
