//! Telemetry envelope: the unit sent over the wire

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::command::CommandRunner;
use crate::facts::CollectionFailure;

/// Envelope keys a provider topic may never use
pub const RESERVED_KEYS: &[&str] = &[
    "device_id",
    "agent_version",
    "collection_time",
    "hostname",
    "os_type",
    "os_version",
    "device_name",
    "collection_errors",
];

/// Host operating system descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub hostname: String,
    /// `Darwin`, `Linux`, `Windows`, ...
    pub os_type: String,
    pub os_version: String,
}

impl HostDescriptor {
    /// Probe the running host. Never fails; unknown values stay empty.
    pub fn detect(runner: &CommandRunner) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();

        Self {
            hostname,
            os_type: os_type_name(std::env::consts::OS).to_string(),
            os_version: os_version(runner).unwrap_or_default(),
        }
    }
}

/// Map Rust's target OS name to the conventional kernel name
pub fn os_type_name(os: &str) -> &str {
    match os {
        "macos" => "Darwin",
        "linux" => "Linux",
        "windows" => "Windows",
        "freebsd" => "FreeBSD",
        other => other,
    }
}

fn os_version(runner: &CommandRunner) -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        runner.run("sw_vers", &["-productVersion"]).ok()
    }

    #[cfg(target_os = "linux")]
    {
        let _ = runner;
        std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .ok()
            .map(|s| s.trim().to_string())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        runner.run("uname", &["-r"]).ok()
    }
}

/// Everything one collection cycle produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    pub device_id: String,
    pub agent_version: String,
    /// RFC 3339 UTC timestamp captured at cycle start
    pub collection_time: String,
    pub hostname: String,
    pub os_type: String,
    pub os_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Successful topics, flattened into the top level
    #[serde(flatten)]
    pub topics: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collection_errors: Vec<CollectionFailure>,
}

impl TelemetryEnvelope {
    pub fn has_failures(&self) -> bool {
        !self.collection_errors.is_empty()
    }

    pub fn topic(&self, name: &str) -> Option<&Value> {
        self.topics.get(name)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use serde_json::json;

    fn envelope() -> TelemetryEnvelope {
        TelemetryEnvelope {
            device_id: "C02TEST".into(),
            agent_version: "0.9.3".into(),
            collection_time: "2026-01-05T10:00:00+00:00".into(),
            hostname: "studio.local".into(),
            os_type: "Darwin".into(),
            os_version: "15.1".into(),
            device_name: None,
            topics: BTreeMap::new(),
            collection_errors: Vec::new(),
        }
    }

    #[test]
    fn test_topics_flattened_at_top_level() {
        let mut env = envelope();
        env.topics
            .insert("system_info".into(), json!({"collection_method": "direct"}));
        let value: Value = serde_json::from_slice(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["system_info"]["collection_method"], "direct");
        assert_eq!(value["device_id"], "C02TEST");
        assert!(value.get("collection_errors").is_none());
        assert!(value.get("device_name").is_none());
    }

    #[test]
    fn test_failures_serialized_when_present() {
        let mut env = envelope();
        env.collection_errors.push(CollectionFailure {
            provider: "network_info".into(),
            kind: ProviderErrorKind::Timeout,
            message: "scutil --dns timed out".into(),
        });
        let value: Value = serde_json::from_slice(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["collection_errors"][0]["provider"], "network_info");
        assert_eq!(value["collection_errors"][0]["kind"], "timeout");
        assert!(env.has_failures());
    }

    #[test]
    fn test_os_type_name() {
        assert_eq!(os_type_name("macos"), "Darwin");
        assert_eq!(os_type_name("linux"), "Linux");
        assert_eq!(os_type_name("haiku"), "haiku");
    }

    #[test]
    fn test_detect_fills_os_type() {
        let host = HostDescriptor::detect(&CommandRunner::default());
        assert!(!host.os_type.is_empty());
    }
}
