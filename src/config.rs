use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = ".hot-or-not/config.yml";

/// Main configuration structure
///
/// The store credential is never read from this file; it is passed on the
/// command line or through `GITHUB_TOKEN`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub voting: VotingConfig,
    pub widget: WidgetConfig,
}

/// Vote endpoint listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Location of the tally document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub owner: String,
    pub repo: String,
    pub path: String,
    /// Branch to read and commit to; the repository default when unset
    pub branch: Option<String>,
    pub api_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            path: "votes.json".to_string(),
            branch: None,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

/// Vote recording behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Fetch/write cycles before giving up on a contended document
    pub max_attempts: u32,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Terminal voting widget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Vote endpoint the widget posts to
    pub endpoint: String,
    /// Snapshot used to seed counts: an http(s) URL or a local file
    pub snapshot: String,
    /// Photo keys are `{key_prefix}-{id}`
    pub key_prefix: String,
    pub photos: Vec<PhotoConfig>,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3000/vote".to_string(),
            snapshot: "votes.json".to_string(),
            key_prefix: "photo".to_string(),
            photos: Vec::new(),
        }
    }
}

/// One photo in the widget roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoConfig {
    pub id: u32,
    pub file: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!(path = %path.display(), "Loaded configuration");

        Ok(config)
    }

    /// Check that the store location is usable
    pub fn validate_store(&self) -> Result<()> {
        if self.store.owner.trim().is_empty() || self.store.repo.trim().is_empty() {
            anyhow::bail!("store.owner and store.repo must be set (or pass --repo owner/repo)");
        }
        if self.store.path.trim().is_empty() {
            anyhow::bail!("store.path must not be empty");
        }
        if self.voting.max_attempts == 0 {
            anyhow::bail!("voting.max_attempts must be at least 1");
        }
        Ok(())
    }
}
