// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Agent configuration
//!
//! Loaded once at startup from a JSON document (or TOML when the path ends
//! in `.toml`). A missing file yields the in-memory defaults; a file that
//! cannot be read, parsed or validated also yields the defaults, together
//! with a [`ConfigError`] the caller surfaces as a warning.
//!
//! ```no_run
//! use posturelib::config::AgentConfig;
//!
//! let loaded = AgentConfig::load("/etc/posture-agent/config.json");
//! if let Some(warning) = &loaded.warning {
//!     eprintln!("using defaults: {}", warning);
//! }
//! println!("interval: {}s", loaded.config.collection_interval);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/posture-agent/config.json";
pub const DEFAULT_API_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_COLLECTION_INTERVAL: u64 = 300;
pub const DEFAULT_COMMAND_TIMEOUT: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 30;

fn default_true() -> bool {
    true
}

/// Per-provider enable flags; every provider is on unless switched off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorToggles {
    #[serde(default = "default_true")]
    pub system_info: bool,
    #[serde(default = "default_true")]
    pub security_status: bool,
    #[serde(default = "default_true")]
    pub network_info: bool,
    #[serde(default = "default_true")]
    pub process_info: bool,
    #[serde(default = "default_true")]
    pub software_inventory: bool,
}

impl Default for CollectorToggles {
    fn default() -> Self {
        Self {
            system_info: true,
            security_status: true,
            network_info: true,
            process_info: true,
            software_inventory: true,
        }
    }
}

impl CollectorToggles {
    /// Look up a flag by provider name. Unknown names are enabled.
    pub fn is_enabled(&self, provider: &str) -> bool {
        match provider {
            "system_info" => self.system_info,
            "security_status" => self.security_status,
            "network_info" => self.network_info,
            "process_info" => self.process_info,
            "software_inventory" => self.software_inventory,
            _ => true,
        }
    }

    pub fn all_enabled(&self) -> bool {
        self.system_info
            && self.security_status
            && self.network_info
            && self.process_info
            && self.software_inventory
    }
}

/// Resolved operating parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the collection service
    pub api_endpoint: String,
    /// Bearer credential sent with every delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Seconds between collection cycles
    pub collection_interval: u64,
    /// Friendly device name reported alongside the identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Explicit device identifier; wins over every probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub log_level: String,
    /// Hard bound for each external command a provider runs (seconds)
    pub command_timeout: u64,
    /// Per-attempt delivery timeout (seconds)
    pub request_timeout: u64,
    pub collectors_enabled: CollectorToggles,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.into(),
            api_key: None,
            collection_interval: DEFAULT_COLLECTION_INTERVAL,
            device_name: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .filter(|h| !h.is_empty()),
            device_id: None,
            log_level: "INFO".into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            collectors_enabled: CollectorToggles::default(),
        }
    }
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    File(PathBuf),
    Defaults,
}

/// Outcome of [`AgentConfig::load`]
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: AgentConfig,
    pub origin: ConfigOrigin,
    /// Set when a file existed but could not be used
    pub warning: Option<ConfigError>,
}

impl AgentConfig {
    /// Load configuration, falling back to defaults instead of failing.
    pub fn load(path: impl AsRef<Path>) -> LoadedConfig {
        let path = path.as_ref();
        if !path.exists() {
            return LoadedConfig {
                config: Self::default(),
                origin: ConfigOrigin::Defaults,
                warning: None,
            };
        }

        match Self::from_file(path) {
            Ok(config) => LoadedConfig {
                config,
                origin: ConfigOrigin::File(path.to_path_buf()),
                warning: None,
            },
            Err(e) => LoadedConfig {
                config: Self::default(),
                origin: ConfigOrigin::Defaults,
                warning: Some(e),
            },
        }
    }

    /// Strict load: read, parse and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let parsed = if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        };

        parsed.map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parse from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection_interval == 0 {
            return Err(ConfigError::Invalid(
                "collection_interval must be greater than 0".into(),
            ));
        }
        if self.api_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("api_endpoint must not be empty".into()));
        }
        if self.command_timeout == 0 || self.request_timeout == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Credential, ignoring blank values
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Full URL of the telemetry submission endpoint
    pub fn telemetry_url(&self) -> String {
        format!("{}/api/v1/telemetry", self.api_endpoint.trim_end_matches('/'))
    }

    /// `log_level` translated into an env_logger filter
    pub fn log_filter(&self) -> String {
        match self.log_level.to_ascii_lowercase().as_str() {
            "warning" => "warn".into(),
            "critical" | "fatal" => "error".into(),
            other => other.into(),
        }
    }

    /// Generate sample config
    pub fn sample_json() -> String {
        r#"{
  "api_endpoint": "https://telemetry.example.com",
  "api_key": "replace-me",
  "collection_interval": 300,
  "device_name": "design-laptop-42",
  "collectors_enabled": {
    "system_info": true,
    "security_status": true,
    "network_info": true,
    "process_info": true,
    "software_inventory": true
  },
  "log_level": "INFO",
  "command_timeout": 10,
  "request_timeout": 30
}
"#
        .into()
    }

    /// Render the effective configuration as TOML, credential redacted
    pub fn to_redacted_toml(&self) -> String {
        let mut redacted = self.clone();
        if redacted.api_key.is_some() {
            redacted.api_key = Some("********".into());
        }
        toml::to_string_pretty(&redacted).unwrap_or_default()
    }
}
