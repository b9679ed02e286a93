use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::discovery::DEFAULT_LABEL_PREFIX;
use crate::exposition::MalformedLinePolicy;
use crate::scrape::DEFAULT_SCRAPE_WORKERS;

const ENV_PREFIX: &str = "METRICS_AGGREGATOR";
const CONFIG_PATH_VAR: &str = "METRICS_AGGREGATOR_CONFIG";

/// Longest accepted discovery refresh interval (one day)
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 86_400;

/// Top-level application configuration loaded from file + environment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub discovery: DiscoverySection,
    pub scrape: ScrapeSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load configuration from disk and environment.
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| "config.toml".to_string());
        let mut config = Self::load_from(Path::new(&config_path))?;

        config.apply_legacy_env(|name| env::var(name).ok())?;
        config.normalize();
        config.validate()?;

        Ok(config)
    }

    /// Load from an optional TOML file layered under `METRICS_AGGREGATOR__*`
    /// environment variables.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut builder = config::Config::builder();

        if config_path.exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(config_path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        let config: Self = settings
            .try_deserialize()
            .with_context(|| format!("invalid configuration in {}", config_path.display()))?;

        Ok(config)
    }

    /// Honour the unprefixed variables older deployments set:
    /// `LOG_LEVEL`, `CACHE_UPDATE_INTERVAL`, `SERVER_WORKERS`, `CLIENT_WORKERS`.
    pub fn apply_legacy_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(interval) = lookup("CACHE_UPDATE_INTERVAL") {
            self.discovery.interval_secs = interval
                .trim()
                .parse()
                .context("invalid CACHE_UPDATE_INTERVAL")?;
        }
        if let Some(workers) = lookup("SERVER_WORKERS") {
            self.server.workers = workers.trim().parse().context("invalid SERVER_WORKERS")?;
        }
        if let Some(workers) = lookup("CLIENT_WORKERS") {
            self.scrape.workers = workers.trim().parse().context("invalid CLIENT_WORKERS")?;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        let level = self.logging.level.trim().to_ascii_lowercase();
        self.logging.level = match level.as_str() {
            "" => "info".to_string(),
            "warning" => "warn".to_string(),
            _ => level,
        };
        self.discovery.label_prefix = self.discovery.label_prefix.trim().to_string();
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.workers == 0 {
            bail!("server.workers must be at least 1");
        }
        if self.scrape.workers == 0 {
            bail!("scrape.workers must be at least 1");
        }
        if self.discovery.interval_secs == 0 {
            bail!("discovery.interval_secs must be at least 1");
        }
        if self.discovery.interval_secs > MAX_REFRESH_INTERVAL_SECS {
            bail!(
                "discovery.interval_secs must be at most {}",
                MAX_REFRESH_INTERVAL_SECS
            );
        }
        if self.discovery.label_prefix.is_empty() {
            bail!("discovery.label_prefix must be specified");
        }
        if self.discovery.label_prefix.contains('/') {
            bail!("discovery.label_prefix must not contain '/'");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Runtime worker threads serving requests
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub interval_secs: u64,
    pub label_prefix: String,
}

impl DiscoverySection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeSection {
    pub workers: usize,
    pub malformed_lines: MalformedLinePolicy,
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            workers: DEFAULT_SCRAPE_WORKERS,
            malformed_lines: MalformedLinePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}
