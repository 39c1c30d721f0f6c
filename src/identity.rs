//! Device identity resolution
//!
//! The identifier is resolved once at startup: a configured `device_id`
//! wins, then the hardware serial number, then the host's network name.
//! The result is never empty.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::command::CommandRunner;

/// Where the identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Configured,
    HardwareSerial,
    Hostname,
    /// Last resort when every probe came back empty
    Generated,
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => write!(f, "configuration"),
            Self::HardwareSerial => write!(f, "hardware serial"),
            Self::Hostname => write!(f, "hostname"),
            Self::Generated => write!(f, "generated"),
        }
    }
}

/// Stable identifier of this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    id: String,
    source: IdentitySource,
}

impl DeviceIdentity {
    /// Resolve using the real probes
    pub fn resolve(configured: Option<&str>, runner: &CommandRunner) -> Self {
        Self::resolve_with(
            configured,
            || hardware_serial(runner),
            || {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
            },
        )
    }

    /// Resolve with injected probes; each probe runs only if needed
    pub fn resolve_with<S, H>(configured: Option<&str>, serial_probe: S, hostname_probe: H) -> Self
    where
        S: FnOnce() -> Option<String>,
        H: FnOnce() -> Option<String>,
    {
        if let Some(id) = non_empty(configured.map(str::to_string)) {
            return Self {
                id,
                source: IdentitySource::Configured,
            };
        }

        if let Some(id) = non_empty(serial_probe()) {
            return Self {
                id,
                source: IdentitySource::HardwareSerial,
            };
        }

        log::warn!("could not read hardware serial, falling back to hostname");
        if let Some(id) = non_empty(hostname_probe()) {
            return Self {
                id,
                source: IdentitySource::Hostname,
            };
        }

        Self {
            id: "unknown-device".into(),
            source: IdentitySource::Generated,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Hardware serial number of this machine, if readable
pub fn hardware_serial(runner: &CommandRunner) -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        runner
            .run("system_profiler", &["SPHardwareDataType"])
            .ok()
            .and_then(|out| parse_profiler_serial(&out))
    }

    #[cfg(not(target_os = "macos"))]
    {
        let _ = runner;
        ["/sys/class/dmi/id/product_serial", "/etc/machine-id"]
            .iter()
            .filter_map(|path| std::fs::read_to_string(path).ok())
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty() && !is_placeholder_serial(s))
    }
}

/// Extract `Serial Number (system): XXXX` from system_profiler text output
pub fn parse_profiler_serial(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains("Serial Number"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg_attr(target_os = "macos", allow(dead_code))]
fn is_placeholder_serial(serial: &str) -> bool {
    let lower = serial.to_ascii_lowercase();
    lower == "0" || lower.contains("to be filled") || lower == "none" || lower == "default string"
}
