//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are loaded from the GEMINI_API_KEYS env var or keys_file,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub stream: StreamConfig,
    /// Path to a file containing seed keys (alternative to GEMINI_API_KEYS)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    /// Raw key seed blob, resolved from env or keys_file
    #[serde(skip)]
    pub key_seed: Option<Secret<String>>,
}

/// Model identifiers for chat and probing
#[derive(Debug, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_chat_model")]
    pub chat: String,
    /// Paid-tier probe model; unset skips the paid rung
    #[serde(default = "default_paid_probe")]
    pub paid_probe: Option<String>,
    #[serde(default = "default_standard_probe")]
    pub standard_probe: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_model(),
            paid_probe: default_paid_probe(),
            standard_probe: default_standard_probe(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProbeSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamConfig {
    /// Minimum milliseconds between streamed message edits
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_chat_model() -> String {
    "gemini-2.5-flash".into()
}

fn default_paid_probe() -> Option<String> {
    Some("gemini-2.5-pro".into())
}

fn default_standard_probe() -> String {
    "gemini-2.5-flash".into()
}

fn default_concurrency() -> usize {
    gemini_pool::DEFAULT_PROBE_CONCURRENCY
}

fn default_flush_interval_ms() -> u64 {
    500
}

impl Config {
    /// Load configuration from a TOML file (defaults when the file does
    /// not exist), then overlay environment variables.
    ///
    /// Key seed resolution order:
    /// 1. GEMINI_API_KEYS env var
    /// 2. keys_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = if path.exists() {
            toml::from_str(&std::fs::read_to_string(path)?)?
        } else {
            Config::default()
        };

        if config.probe.concurrency == 0 {
            return Err(common::Error::Config(
                "probe.concurrency must be greater than 0".into(),
            ));
        }
        if config.stream.flush_interval_ms == 0 {
            return Err(common::Error::Config(
                "stream.flush_interval_ms must be greater than 0".into(),
            ));
        }

        if let Ok(seed) = std::env::var("GEMINI_API_KEYS") {
            if !seed.trim().is_empty() {
                config.key_seed = Some(Secret::new(seed));
            }
        } else if let Some(ref keys_file) = config.keys_file {
            let seed = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            if !seed.trim().is_empty() {
                config.key_seed = Some(Secret::new(seed));
            }
        }

        Ok(config)
    }

    /// Split the raw seed into candidate keys on commas and whitespace.
    pub fn seed_keys(&self) -> Vec<String> {
        let Some(seed) = &self.key_seed else {
            return Vec::new();
        };
        seed.expose()
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Resolve config file path from CLI arg or RELAY_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("RELAY_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("bot-relay.toml")
    }
}
