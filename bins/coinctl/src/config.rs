//! CLI configuration: defaults, then an optional TOML file, then
//! `COINCTL_*` environment variables.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `COINCTL_ESPLORA__LITECOIN` or `COINCTL_PRIVACY__REUSE_PENALTY`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use coinctl_core::types::Chain;
use coinctl_engine::{EngineConfig, PrivacyPolicy};

const ENV_PREFIX: &str = "COINCTL";

/// Esplora API base URL per chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EsploraUrls {
    pub bitcoin: String,
    pub bitcoin_testnet: String,
    pub litecoin: String,
}

impl Default for EsploraUrls {
    fn default() -> Self {
        Self {
            bitcoin: "https://mempool.space/api".to_string(),
            bitcoin_testnet: "https://mempool.space/testnet/api".to_string(),
            litecoin: "https://litecoinspace.org/api".to_string(),
        }
    }
}

impl EsploraUrls {
    pub fn for_chain(&self, chain: Chain) -> &str {
        match chain {
            Chain::Bitcoin => &self.bitcoin,
            Chain::BitcoinTestnet => &self.bitcoin_testnet,
            Chain::Litecoin => &self.litecoin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// JSON file holding UTXO metadata.
    pub metadata_path: PathBuf,
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// `json` for structured log lines, anything else for text.
    pub log_format: String,
    /// Bound on each chain fetch, in seconds.
    pub refresh_timeout_secs: u64,
    pub esplora: EsploraUrls,
    pub privacy: PrivacyPolicy,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            metadata_path: data_dir().join("metadata.json"),
            log_level: "warn".to_string(),
            log_format: "text".to_string(),
            refresh_timeout_secs: coinctl_core::constants::DEFAULT_REFRESH_TIMEOUT_SECS,
            esplora: EsploraUrls::default(),
            privacy: PrivacyPolicy::default(),
        }
    }
}

/// `~/.coinctl`, or `./.coinctl` without a home directory.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".coinctl")
}

pub fn default_config_path() -> PathBuf {
    data_dir().join("config.toml")
}

impl CliConfig {
    /// Load from `path` (or the default location, if present) and the
    /// environment. An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", file.display()))?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_refresh_timeout(Duration::from_secs(self.refresh_timeout_secs))
            .with_privacy(self.privacy.clone())
    }
}
