//! Built-in fact providers
//!
//! Five providers ship with the agent and always run in this order:
//!
//! | Provider             | Source                                          |
//! |----------------------|-------------------------------------------------|
//! | `system_info`        | Munki `MachineInfo`, else `system_profiler`     |
//! | `security_status`    | `fdesetup`, `csrutil`, `socketfilterfw`, `spctl` |
//! | `network_info`       | `route`, `scutil`                               |
//! | `process_info`       | `ps`, load average                              |
//! | `software_inventory` | Munki installs, else `system_profiler`; `brew`  |
//!
//! Off macOS most probes are unavailable. Providers degrade to whatever the
//! host offers (`/proc`, `/etc/os-release`) or fail with a recorded
//! [`ProviderError`](crate::error::ProviderError).

pub mod network_info;
pub mod process_info;
pub mod security_status;
pub mod software_inventory;
pub mod system_info;

use serde_json::Value;
use std::fmt;

use crate::command::CommandRunner;
use crate::config::AgentConfig;
use crate::error::ProbeError;
use crate::facts::FactProvider;
use crate::munki::{parse_plist, plist_to_json, MunkiSource};

pub use network_info::NetworkInfoProvider;
pub use process_info::ProcessInfoProvider;
pub use security_status::SecurityStatusProvider;
pub use software_inventory::SoftwareInventoryProvider;
pub use system_info::SystemInfoProvider;

/// The built-in providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    SystemInfo,
    SecurityStatus,
    NetworkInfo,
    ProcessInfo,
    SoftwareInventory,
}

impl ProviderKind {
    /// Execution order
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::SystemInfo,
        ProviderKind::SecurityStatus,
        ProviderKind::NetworkInfo,
        ProviderKind::ProcessInfo,
        ProviderKind::SoftwareInventory,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::SystemInfo => "system_info",
            Self::SecurityStatus => "security_status",
            Self::NetworkInfo => "network_info",
            Self::ProcessInfo => "process_info",
            Self::SoftwareInventory => "software_inventory",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn build(self, runner: &CommandRunner, munki: &MunkiSource) -> Box<dyn FactProvider> {
        match self {
            Self::SystemInfo => Box::new(SystemInfoProvider::new(runner.clone(), munki.clone())),
            Self::SecurityStatus => Box::new(SecurityStatusProvider::new(runner.clone())),
            Self::NetworkInfo => Box::new(NetworkInfoProvider::new(runner.clone())),
            Self::ProcessInfo => Box::new(ProcessInfoProvider::new(runner.clone())),
            Self::SoftwareInventory => {
                Box::new(SoftwareInventoryProvider::new(runner.clone(), munki.clone()))
            }
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Instantiate every enabled provider, in execution order
pub fn build_providers(
    config: &AgentConfig,
    runner: &CommandRunner,
    munki: &MunkiSource,
) -> Vec<Box<dyn FactProvider>> {
    ProviderKind::ALL
        .into_iter()
        .filter(|kind| {
            let enabled = config.collectors_enabled.is_enabled(kind.name());
            if !enabled {
                log::info!("{} disabled by configuration", kind);
            }
            enabled
        })
        .map(|kind| kind.build(runner, munki))
        .collect()
}

/// Providers for the running host: live command runner and Munki detection
pub fn default_providers(config: &AgentConfig) -> Vec<Box<dyn FactProvider>> {
    let runner = CommandRunner::new(config.command_timeout());
    let munki = MunkiSource::detect(&runner);
    build_providers(config, &runner, &munki)
}

/// Run `system_profiler -xml <data_type>` and return the `_items` array
pub(crate) fn system_profiler(runner: &CommandRunner, data_type: &str) -> Result<Vec<Value>, ProbeError> {
    let bytes = runner.run_bytes("system_profiler", &["-xml", data_type])?;
    profiler_items(&plist_to_json(&parse_plist(&bytes)?))
}

/// Pull `[0]._items` out of a parsed `system_profiler` document
pub(crate) fn profiler_items(document: &Value) -> Result<Vec<Value>, ProbeError> {
    document
        .get(0)
        .and_then(|d| d.get("_items"))
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ProbeError::parse("system_profiler output has no _items"))
}

/// Value after the first `:` on a `key: value` line
pub(crate) fn value_after_colon(line: &str) -> Option<&str> {
    line.split_once(':')
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorToggles;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_provider_names_unique() {
        let names: HashSet<&str> = ProviderKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), ProviderKind::ALL.len());
    }

    #[test]
    fn test_from_name_round_trips() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ProviderKind::from_name("bluetooth"), None);
    }

    #[test]
    fn test_build_providers_respects_toggles_and_order() {
        let config = AgentConfig {
            collectors_enabled: CollectorToggles {
                network_info: false,
                process_info: false,
                ..CollectorToggles::default()
            },
            ..AgentConfig::default()
        };
        let providers = build_providers(&config, &CommandRunner::default(), &MunkiSource::unavailable());
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["system_info", "security_status", "software_inventory"]);
    }

    #[test]
    fn test_topics_match_names() {
        let providers =
            build_providers(&AgentConfig::default(), &CommandRunner::default(), &MunkiSource::unavailable());
        assert_eq!(providers.len(), 5);
        for provider in &providers {
            assert_eq!(provider.topic(), provider.name());
        }
    }

    #[test]
    fn test_profiler_items() {
        let doc = json!([{ "_dataType": "SPHardwareDataType", "_items": [{ "machine_model": "Mac14,2" }] }]);
        let items = profiler_items(&doc).unwrap();
        assert_eq!(items[0]["machine_model"], "Mac14,2");
        assert!(profiler_items(&json!([])).is_err());
    }

    #[test]
    fn test_value_after_colon() {
        assert_eq!(value_after_colon("  gateway: 10.0.0.1"), Some("10.0.0.1"));
        assert_eq!(value_after_colon("HTTPProxy : "), None);
        assert_eq!(value_after_colon("no separator"), None);
    }
}
