//! Configuration loaded from `config.toml`.
//!
//! Precedence, lowest first: built-in defaults, the config file, environment variables,
//! command-line flags (applied by the CLI).
//!
//! ```toml
//! corpus_path = "~/Library/Messages/chat.db"
//! log_level = "info"
//!
//! [server]
//! bind = "127.0.0.1"
//! port = 8787
//!
//! [catalog]
//! api_base = "https://api.spotify.com/v1"
//! batch_size = 100
//! timeout_secs = 15
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::synth::catalog::ADD_BATCH_LIMIT;
use crate::synth::spotify::DEFAULT_API_BASE;
use crate::utils::environment::default_config_path;
use crate::utils::paths::expand_tilde;

pub const CONFIG_ENV: &str = "CHAT_PLAYLIST_CONFIG";
pub const CORPUS_ENV: &str = "CHAT_PLAYLIST_CORPUS";
pub const TOKEN_ENV: &str = "SPOTIFY_ACCESS_TOKEN";

pub const DEFAULT_CORPUS_PATH: &str = "~/Library/Messages/chat.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub corpus_path: String,
    pub log_level: String,
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub api_base: String,
    /// Bearer token for the catalog; prefer the environment over the file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus_path: DEFAULT_CORPUS_PATH.to_string(),
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1".to_string(), port: 8787 }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            access_token: None,
            batch_size: ADD_BATCH_LIMIT,
            timeout_secs: 15,
        }
    }
}

impl Config {
    /// Load from `$CHAT_PLAYLIST_CONFIG` or the default location, then apply the environment
    pub fn load() -> Result<Self> {
        let path = env::var_os(CONFIG_ENV).map(PathBuf::from).or_else(default_config_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            Some(path) => {
                debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(corpus) = lookup(CORPUS_ENV).filter(|v| !v.trim().is_empty()) {
            self.corpus_path = corpus;
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.catalog.access_token = Some(token);
        }
    }

    pub fn corpus_path(&self) -> PathBuf {
        expand_tilde(&self.corpus_path)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.catalog.access_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn batch_size(&self) -> usize {
        self.catalog.batch_size.clamp(1, ADD_BATCH_LIMIT)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.timeout_secs.max(1))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}
