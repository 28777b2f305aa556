// File: console/vm_console/src/config/mod.rs

use std::env;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::dispatcher::DispatcherConfig;
use crate::poller::PollerConfig;
use crate::realtime::RealtimeConfig;


#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub local_base_url: String,
    pub remote_base_url: String,
    pub host: String,
    pub request_timeout_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            local_base_url: "http://localhost:5678".to_string(),
            remote_base_url: "http://localhost:5678".to_string(),
            host: "localhost".to_string(),
            request_timeout_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub anon_key: String,
    pub table: String,
    pub id_column: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:54321".to_string(),
            anon_key: String::new(),
            table: "vm_creation_requests".to_string(),
            id_column: "form_submission_unique_id".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub timeout_secs: u64,
    pub heartbeat_secs: u64,
    pub join_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30 * 60,
            heartbeat_secs: 30,
            join_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub automation: AutomationConfig,
    pub store: StoreConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        // If the file doesn't exist, return the default config
        if !path.exists() {
            return Ok(Self::default());
        }

        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    // Intervals that feed timers must be non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("monitor.timeout_secs", self.monitor.timeout_secs),
            ("monitor.heartbeat_secs", self.monitor.heartbeat_secs),
            ("monitor.join_timeout_secs", self.monitor.join_timeout_secs),
            ("automation.request_timeout_ms", self.automation.request_timeout_ms),
        ];

        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", key)));
            }
        }

        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = set("VMCTL_HOST") {
            self.automation.host = host;
        }
        if let Some(url) = set("SUPABASE_URL") {
            self.store.url = url;
        }
        if let Some(key) = set("SUPABASE_ANON_KEY") {
            self.store.anon_key = key;
        }
    }

    // Workflow backend base, local when served from localhost
    pub fn api_base_url(&self) -> &str {
        if self.automation.host == "localhost" {
            &self.automation.local_base_url
        } else {
            &self.automation.remote_base_url
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            base_url: self.api_base_url().to_string(),
            timeout_ms: self.automation.request_timeout_ms,
        }
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            store_url: self.store.url.clone(),
            api_key: self.store.anon_key.clone(),
            table: self.store.table.clone(),
            id_column: self.store.id_column.clone(),
            heartbeat_interval_ms: self.monitor.heartbeat_secs * 1000,
            join_timeout_ms: self.monitor.join_timeout_secs * 1000,
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            store_url: self.store.url.clone(),
            api_key: self.store.anon_key.clone(),
            table: self.store.table.clone(),
            id_column: self.store.id_column.clone(),
            timeout_ms: self.automation.request_timeout_ms,
        }
    }

    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.timeout_secs)
    }
}
