//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (store keys, admin token) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

use crate::engine::BoardOptions;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub board: BoardConfig,
    pub store: StoreConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoardConfig {
    pub name: String,
    pub poll_interval_secs: u64,
    #[serde(default = "default_ticker_len")]
    pub ticker_len: usize,
    /// Display names in fixed slot order. Unlisted names go last.
    #[serde(default)]
    pub display_order: Vec<String>,
}

fn default_ticker_len() -> usize {
    5
}

/// Which `BetStore` backend to run against.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Remote,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// JSON file path for the file backend.
    #[serde(default)]
    pub path: Option<String>,
    /// Env var holding the remote base URL.
    #[serde(default)]
    pub url_env: Option<String>,
    /// Env var holding the remote API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
    /// Env var holding the admin token for reset / status routes.
    #[serde(default)]
    pub admin_token_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.board.poll_interval_secs == 0 {
            bail!("board.poll_interval_secs must be positive");
        }
        match self.store.backend {
            StoreBackend::File if self.store.path.is_none() => {
                bail!("store.path is required for the file backend")
            }
            StoreBackend::Remote
                if self.store.url_env.is_none() || self.store.api_key_env.is_none() =>
            {
                bail!("store.url_env and store.api_key_env are required for the remote backend")
            }
            _ => Ok(()),
        }
    }

    /// Layout options for building boards.
    pub fn board_options(&self) -> BoardOptions {
        BoardOptions {
            display_order: self.board.display_order.clone(),
            ticker_len: self.board.ticker_len,
        }
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
