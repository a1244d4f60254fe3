//! Configuration management for fabriqd.
//!
//! Loads settings from /etc/fabriq/config.toml or uses defaults.

use anyhow::Result;
use fabriq_common::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/fabriq/config.toml";

/// Document store seeding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON seed file with one array of documents per collection.
    #[serde(default = "default_seed_path")]
    pub seed_path: String,
}

fn default_seed_path() -> String {
    "/var/lib/fabriq/catalog.json".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            seed_path: default_seed_path(),
        }
    }
}

/// Optional LLM phrasing pass for answers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    #[serde(default)]
    pub llm_phrasing: bool,

    #[serde(default = "default_phrasing_timeout")]
    pub timeout_secs: u64,
}

fn default_phrasing_timeout() -> u64 {
    8
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            llm_phrasing: false,
            timeout_secs: default_phrasing_timeout(),
        }
    }
}

/// Optional LLM vote for the answer-audience classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub llm_classify: bool,

    #[serde(default = "default_role_timeout")]
    pub timeout_secs: u64,
}

fn default_role_timeout() -> u64 {
    4
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            llm_classify: false,
            timeout_secs: default_role_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabriqConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub synthesizer: SynthesizerConfig,

    #[serde(default)]
    pub role: RoleConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7601".to_string()
}

impl Default for FabriqConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            llm: LlmConfig::default(),
            store: StoreConfig::default(),
            synthesizer: SynthesizerConfig::default(),
            role: RoleConfig::default(),
        }
    }
}

impl FabriqConfig {
    /// Load from the given path, falling back to defaults when the file is
    /// missing or unreadable. A malformed file is a warning, not a crash.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => {
                    info!("loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("failed to parse {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("no config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Persist the current configuration (installer helper).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
