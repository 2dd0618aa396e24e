//! Store configuration.
//!
//! Values come from a JSON file, from `MESSAGE_STATE_*` environment variables, or
//! from defaults, in that order of precedence when combined by the binary.

use crate::backend::Endpoint;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const ENV_NODES: &str = "MESSAGE_STATE_NODES";
pub const ENV_DB: &str = "MESSAGE_STATE_DB";
pub const ENV_GC_THRESHOLD: &str = "MESSAGE_STATE_GC_THRESHOLD";
pub const ENV_RETRY_BOUND: &str = "MESSAGE_STATE_RETRY_BOUND";
pub const ENV_BACKOFF_MS: &str = "MESSAGE_STATE_BACKOFF_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "MESSAGE_STATE_CONNECT_TIMEOUT_MS";

/// Failover attempts before an operation gives up.
pub const DEFAULT_RETRY_BOUND: u32 = 120;
/// Wait between failover attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_GC_THRESHOLD_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Replica set endpoints, probed in order during discovery.
    pub nodes: Vec<Endpoint>,
    /// Database index selected on every connection.
    pub db: i64,
    /// Grace window added to "now" when deciding whether a record expired.
    pub gc_threshold_secs: i64,
    pub retry_bound: u32,
    pub backoff_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            nodes: vec![Endpoint::new("127.0.0.1", 6379)],
            db: 0,
            gc_threshold_secs: DEFAULT_GC_THRESHOLD_SECS,
            retry_bound: DEFAULT_RETRY_BOUND,
            backoff_ms: DEFAULT_BACKOFF.as_millis() as u64,
            connect_timeout_ms: 2000,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from defaults overridden by whatever `lookup` returns for
    /// each `MESSAGE_STATE_*` variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_lookup(lookup)?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_lookup<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(nodes) = lookup(ENV_NODES) {
            self.nodes = parse_nodes(&nodes)?;
        }
        if let Some(db) = lookup(ENV_DB) {
            self.db = parse_number(ENV_DB, &db)?;
        }
        if let Some(threshold) = lookup(ENV_GC_THRESHOLD) {
            self.gc_threshold_secs = parse_number(ENV_GC_THRESHOLD, &threshold)?;
        }
        if let Some(bound) = lookup(ENV_RETRY_BOUND) {
            self.retry_bound = parse_number(ENV_RETRY_BOUND, &bound)?;
        }
        if let Some(backoff) = lookup(ENV_BACKOFF_MS) {
            self.backoff_ms = parse_number(ENV_BACKOFF_MS, &backoff)?;
        }
        if let Some(timeout) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            self.connect_timeout_ms = parse_number(ENV_CONNECT_TIMEOUT_MS, &timeout)?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("at least one replica endpoint is required");
        }
        if self.retry_bound == 0 {
            anyhow::bail!("retry bound must be at least 1");
        }
        if self.gc_threshold_secs < 0 {
            anyhow::bail!(
                "gc threshold must not be negative (got {})",
                self.gc_threshold_secs
            );
        }
        Ok(())
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Parses a comma-separated `host:port` list. Blank entries are ignored.
pub fn parse_nodes(raw: &str) -> Result<Vec<Endpoint>> {
    let nodes = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse::<Endpoint>())
        .collect::<Result<Vec<_>, _>>()?;

    if nodes.is_empty() {
        anyhow::bail!("no replica endpoints in '{}'", raw);
    }
    Ok(nodes)
}

fn parse_number<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{} must be a number, got '{}'", name, raw))
}
