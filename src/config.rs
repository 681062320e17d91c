//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub observation: ObservationConfig,
    pub anomaly: AnomalyConfig,
    pub correlation: CorrelationConfig,
    pub temporal: TemporalConfig,
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub data_dir: String,
    pub port: u16,
    pub retry_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObservationConfig {
    pub horizons_days: Vec<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnomalyConfig {
    pub z_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrelationConfig {
    pub min_samples: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TemporalConfig {
    pub deviation_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutboxConfig {
    pub max_retries: u32,
}

/// Optional remote sync endpoint. When `endpoint` is unset the outbox
/// only accepts entries pushed via the API and replays them nowhere,
/// which suits local development.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
