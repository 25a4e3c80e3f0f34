//! Configuration Management
//!
//! Handles persistent configuration storage for dpctl and turns it into
//! client options and retry policies.

use crate::cloud::{
    CloudConfiguration, ExponentialBackoffConfig, RetryPolicy, ServiceConfiguration,
    TransportOptions, DEFAULT_POLL_FREQUENCY,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cloud environment
const DEFAULT_ENVIRONMENT: &str = "public";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Cloud environment name (public, usgovernment, china)
    #[serde(default)]
    pub environment: Option<String>,
    /// Extra or overriding services, keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfiguration>,
    /// Prepended to the User-Agent
    #[serde(default)]
    pub application_id: Option<String>,
    /// Seconds between long-running operation polls
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub transport: TransportOptions,
}

/// Retry decorator settings as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Regular expressions matched against error messages
    pub error_patterns: Vec<String>,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval_ms: u64,
    /// 0 means no elapsed-time limit
    pub max_elapsed_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let backoff = ExponentialBackoffConfig::default();
        Self {
            error_patterns: Vec::new(),
            initial_interval_ms: backoff.initial_interval.as_millis() as u64,
            multiplier: backoff.multiplier,
            randomization_factor: backoff.randomization_factor,
            max_interval_ms: backoff.max_interval.as_millis() as u64,
            max_elapsed_ms: backoff
                .max_elapsed_time
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> ExponentialBackoffConfig {
        ExponentialBackoffConfig {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            randomization_factor: self.randomization_factor,
            multiplier: self.multiplier,
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_elapsed_time: (self.max_elapsed_ms > 0)
                .then(|| Duration::from_millis(self.max_elapsed_ms)),
        }
    }
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dpctl").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("failed to create {:?}: {}", parent, e)))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("failed to write {:?}: {}", path, e)))?;

        Ok(())
    }

    /// Effective environment name (CLI > config > public)
    pub fn effective_environment(&self) -> String {
        self.environment
            .clone()
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }

    /// Environment preset with configured services merged on top
    pub fn cloud(&self) -> Result<CloudConfiguration> {
        let name = self.effective_environment();
        let mut cloud = CloudConfiguration::from_name(&name).ok_or_else(|| {
            Error::Config(format!("unknown cloud environment `{}`", name))
        })?;
        for (service, configuration) in &self.services {
            cloud = cloud.with_service(service, configuration.clone());
        }
        Ok(cloud)
    }

    pub fn poll_frequency(&self) -> Duration {
        self.poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_FREQUENCY)
    }

    /// Retry policy from the stored settings; `None` when no patterns are set
    pub fn retry_policy(&self) -> Result<Option<RetryPolicy>> {
        if self.retry.error_patterns.is_empty() {
            return Ok(None);
        }
        RetryPolicy::from_patterns(self.retry.backoff(), &self.retry.error_patterns).map(Some)
    }

    /// Set environment and save
    pub fn set_environment(&mut self, environment: &str) -> Result<()> {
        if CloudConfiguration::from_name(environment).is_none() {
            return Err(Error::Config(format!(
                "unknown cloud environment `{}`",
                environment
            )));
        }
        self.environment = Some(environment.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.effective_environment(), "public");
        assert_eq!(config.poll_frequency(), Duration::from_secs(10));
        assert!(config.retry_policy().unwrap().is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "environment": "china",
                "services": {"custom": {"endpoint": "https://custom.example", "audience": "https://custom.example"}},
                "retry": {"error_patterns": ["(?i)throttl"], "initial_interval_ms": 10},
                "transport": {"max_retries": 0}
            }"#,
        )
        .unwrap();

        let cloud = config.cloud().unwrap();
        assert!(cloud.service("custom").is_some());
        assert_eq!(
            cloud.service("resourceManager").unwrap().endpoint,
            "https://management.chinacloudapi.cn"
        );

        let policy = config.retry_policy().unwrap().unwrap();
        assert_eq!(policy.patterns().len(), 1);
        assert_eq!(config.retry.multiplier, 1.5);
        assert_eq!(config.retry.backoff().initial_interval, Duration::from_millis(10));
        assert_eq!(config.transport.max_retries, 0);
        assert_eq!(config.transport.retry_delay, Duration::from_millis(800));
    }

    #[test]
    fn test_unknown_environment() {
        let config = Config {
            environment: Some("mars".to_string()),
            ..Config::default()
        };
        assert!(config.cloud().is_err());
    }

    #[test]
    fn test_set_unknown_environment_is_config_error() {
        let mut config = Config::default();
        let err = config.set_environment("mars").unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("mars")));
        assert_eq!(config.environment, None);
    }

    #[test]
    fn test_save_to_unwritable_path_is_config_error() {
        let dir = std::env::temp_dir().join(format!("dpctl-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        // A directory where the file should go makes the write fail
        let target = dir.join("config.json");
        std::fs::create_dir_all(&target).unwrap();

        let err = Config::default().save_to(&target).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let ok = dir.join("nested").join("config.json");
        Config::default().save_to(&ok).unwrap();
        let reloaded: Config = serde_json::from_str(&std::fs::read_to_string(&ok).unwrap()).unwrap();
        assert_eq!(reloaded.effective_environment(), "public");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_zero_elapsed_means_unbounded() {
        let settings = RetrySettings {
            max_elapsed_ms: 0,
            ..RetrySettings::default()
        };
        assert_eq!(settings.backoff().max_elapsed_time, None);
    }
}
