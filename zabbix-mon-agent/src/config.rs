//! Agent configuration
//!
//! Layers, lowest to highest priority:
//! - built-in defaults
//! - TOML file (`--config`, else the OS config dir)
//! - environment variables
//! - command-line flags
//!
//! Environment and flags both arrive through [`Cli`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cli::Cli;
use crate::scheduler::SchedulerConfig;

const FALLBACK_HOST: &str = "monitoring-host";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub zabbix: ZabbixConfig,
    pub collection: CollectionConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZabbixConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub trapper_port: u16,
}

/// The disk items always describe `/`, so there is no mount option; unknown
/// keys such as a leftover `disk_mount` are rejected at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionConfig {
    pub interval_secs: u64,
    pub cycle_timeout_secs: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub http_timeout_secs: u64,
    pub sender_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for ZabbixConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost/api_jsonrpc.php".to_string(),
            user: "Admin".to_string(),
            password: "zabbix".to_string(),
            host: default_host(),
            trapper_port: 10051,
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            cycle_timeout_secs: 30,
            batch_size: 50,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            sender_timeout_secs: 10,
            max_retries: 3,
            retry_backoff_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

fn default_host() -> String {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOST.to_string())
}

impl AgentConfig {
    /// Build the effective configuration from every layer
    pub async fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = Self::load(cli.config.as_deref()).await?;
        config.apply_overrides(cli);
        Ok(config)
    }

    /// Read the TOML file. An explicit path must exist; a missing default
    /// file means built-in defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::config_file_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// `<config dir>/zabbix-mon-agent/config.toml`
    pub fn config_file_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("zabbix-mon-agent");
        path.push("config.toml");
        Some(path)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(url) = &cli.zabbix_url {
            self.zabbix.url = url.clone();
        }
        if let Some(user) = &cli.zabbix_user {
            self.zabbix.user = user.clone();
        }
        if let Some(password) = &cli.zabbix_password {
            self.zabbix.password = password.clone();
        }
        if let Some(host) = &cli.zabbix_host {
            self.zabbix.host = host.clone();
        }
        if let Some(port) = cli.trapper_port {
            self.zabbix.trapper_port = port;
        }
        if let Some(interval) = cli.interval {
            self.collection.interval_secs = interval.as_secs();
        }
        if let Some(timeout) = cli.cycle_timeout {
            self.collection.cycle_timeout_secs = timeout.as_secs();
        }
        if let Some(size) = cli.batch_size {
            self.collection.batch_size = size;
        }
        if let Some(timeout) = cli.http_timeout {
            self.delivery.http_timeout_secs = timeout.as_secs();
        }
        if let Some(timeout) = cli.sender_timeout {
            self.delivery.sender_timeout_secs = timeout.as_secs();
        }
        if let Some(retries) = cli.max_retries {
            self.delivery.max_retries = retries;
        }
        if let Some(backoff) = cli.retry_backoff {
            self.delivery.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.to_lowercase();
        }
        if let Some(format) = cli.log_format {
            self.logging.format = format;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let zabbix = &self.zabbix;
        if zabbix.url.trim().is_empty() {
            bail!("zabbix.url must not be empty");
        }
        let url = Url::parse(&zabbix.url).with_context(|| format!("zabbix.url {:?} is not a valid URL", zabbix.url))?;
        if url.host_str().is_none() {
            bail!("zabbix.url {:?} has no host", zabbix.url);
        }
        if zabbix.user.is_empty() {
            bail!("zabbix.user must not be empty");
        }
        if zabbix.password.is_empty() {
            bail!("zabbix.password must not be empty");
        }
        if zabbix.host.trim().is_empty() {
            bail!("zabbix.host must not be empty");
        }
        if zabbix.trapper_port == 0 {
            bail!("zabbix.trapper_port must not be 0");
        }

        if self.collection.interval_secs == 0 {
            bail!("collection.interval_secs must be at least 1");
        }
        if self.collection.cycle_timeout_secs == 0 {
            bail!("collection.cycle_timeout_secs must be at least 1");
        }
        if self.collection.batch_size == 0 {
            bail!("collection.batch_size must be at least 1");
        }

        if self.delivery.max_retries == 0 {
            bail!("delivery.max_retries must be at least 1");
        }
        if self.delivery.http_timeout_secs == 0 || self.delivery.sender_timeout_secs == 0 {
            bail!("delivery timeouts must be at least 1 second");
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level {:?} is not one of {}", self.logging.level, LOG_LEVELS.join(", "));
        }
        Ok(())
    }

    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.zabbix.password = "***".to_string();
        config
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            host: self.zabbix.host.clone(),
            interval: Duration::from_secs(self.collection.interval_secs),
            cycle_timeout: Duration::from_secs(self.collection.cycle_timeout_secs),
            max_retries: self.delivery.max_retries,
            retry_backoff: Duration::from_millis(self.delivery.retry_backoff_ms),
            batch_size: self.collection.batch_size,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.http_timeout_secs)
    }

    pub fn sender_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.sender_timeout_secs)
    }
}
