use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_PROVIDER: &str = "google";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default model (optional)
    pub model: Option<String>,

    /// Repository backend: "google" or "stub".
    pub provider: Option<String>,

    /// Typewriter pause per character, in milliseconds.
    pub reveal_delay_ms: Option<u64>,

    #[serde(default)]
    pub google: GoogleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GoogleConfig {
    pub api_key: Option<String>,

    /// Override for https://generativelanguage.googleapis.com/
    pub api_base: Option<String>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}

/// Effective settings after flags, environment and file are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub model: String,
    pub provider: String,
    pub reveal_delay: Duration,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

/// Command-line values that take precedence over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub reveal_delay_ms: Option<u64>,
}

impl Settings {
    /// Flags > `env_api_key` > config file > defaults.
    pub fn resolve(cfg: Option<&Config>, overrides: Overrides, env_api_key: Option<String>) -> Self {
        let model = overrides
            .model
            .or_else(|| cfg.and_then(|c| c.model.clone()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let provider = overrides
            .provider
            .or_else(|| cfg.and_then(|c| c.provider.clone()))
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

        let reveal_delay = overrides
            .reveal_delay_ms
            .or_else(|| cfg.and_then(|c| c.reveal_delay_ms))
            .map(Duration::from_millis)
            .unwrap_or(crate::session::DEFAULT_REVEAL_DELAY);

        let api_key = env_api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| cfg.and_then(|c| c.google.api_key.clone()))
            .filter(|k| !k.trim().is_empty());

        Self {
            model,
            provider,
            reveal_delay,
            api_key,
            api_base: cfg.and_then(|c| c.google.api_base.clone()),
        }
    }
}
