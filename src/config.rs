//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at startup; a missing key is a startup error, never deferred
//! to the first request.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::limiter::{RateLimitConfig, RatePreset};
use crate::risk::RiskConfig;
use crate::storage::DEFAULT_SIGNAL_FILE;
use crate::types::{ScanMode, SmartflowError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub scan: ScanConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key now. Missing key ⇒ `MissingCredential`.
    pub fn api_key(&self) -> Result<SecretString> {
        AppConfig::resolve_env(&self.api_key_env).map(SecretString::new)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    pub chains: Vec<String>,
    pub modes: Vec<ScanMode>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Deep-analyse the top signals of each scan.
    #[serde(default)]
    pub analyze: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_limit() -> usize {
    20
}

fn default_interval_secs() -> u64 {
    300
}

/// Rate preset plus optional per-field overrides.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub preset: RatePreset,
    pub max_tokens: Option<f64>,
    pub refill_rate: Option<f64>,
    pub min_delay_ms: Option<u64>,
}

impl RateLimitSettings {
    pub fn limiter_config(&self) -> RateLimitConfig {
        let base = self.preset.config();
        RateLimitConfig {
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            refill_rate: self.refill_rate.unwrap_or(base.refill_rate),
            min_delay: self
                .min_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.min_delay),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_SIGNAL_FILE)
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(SmartflowError::Config(msg.to_string()).into());
        if self.scan.chains.is_empty() {
            return fail("scan.chains must not be empty");
        }
        if self.scan.modes.is_empty() {
            return fail("scan.modes must not be empty");
        }
        if self.scan.interval_secs == 0 {
            return fail("scan.interval_secs must be positive");
        }
        let limits = self.rate_limit.limiter_config();
        if limits.max_tokens <= 0.0 || limits.refill_rate <= 0.0 {
            return fail("rate_limit max_tokens and refill_rate must be positive");
        }
        if self.risk.max_signals_per_scan == 0 {
            return fail("risk.max_signals_per_scan must be positive");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        match std::env::var(env_name) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(SmartflowError::MissingCredential(env_name.to_string()).into()),
        }
    }
}
