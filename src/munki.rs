//! Munki managed-source integration
//!
//! Munki writes a `ManagedInstallReport.plist` after every run. When the
//! report exists it is the authoritative record for hardware, OS and
//! software facts on a managed Mac.

use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::command::CommandRunner;
use crate::error::ProbeError;
use crate::facts::FactSet;

pub const MANAGED_INSTALL_REPORT: &str = "/Library/Managed Installs/ManagedInstallReport.plist";
pub const MUNKI_BINARY: &str = "managedsoftwareupdate";

/// Location and availability of the Munki install report
#[derive(Debug, Clone)]
pub struct MunkiSource {
    report_path: PathBuf,
    installed: bool,
}

impl MunkiSource {
    /// Probe for a Munki installation with a report on disk
    pub fn detect(runner: &CommandRunner) -> Self {
        let report_path = PathBuf::from(MANAGED_INSTALL_REPORT);
        let installed = runner.exists(MUNKI_BINARY) && report_path.exists();
        log::debug!("munki installed: {}", installed);
        Self {
            report_path,
            installed,
        }
    }

    /// Use an explicit report file
    pub fn with_report(path: impl Into<PathBuf>) -> Self {
        Self {
            report_path: path.into(),
            installed: true,
        }
    }

    /// A source that is never available
    pub fn unavailable() -> Self {
        Self {
            report_path: PathBuf::from(MANAGED_INSTALL_REPORT),
            installed: false,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn load_report(&self) -> Result<ManagedReport, ProbeError> {
        if !self.installed {
            return Err(ProbeError::command_failed("munki is not installed"));
        }
        ManagedReport::from_file(&self.report_path)
    }
}

/// Parsed `ManagedInstallReport.plist`
#[derive(Debug, Clone)]
pub struct ManagedReport {
    root: Map<String, Value>,
}

impl ManagedReport {
    pub fn from_file(path: &Path) -> Result<Self, ProbeError> {
        let value = plist::Value::from_file(path).map_err(|e| plist_error(path, e))?;
        Self::from_plist(value)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProbeError> {
        let value = parse_plist(bytes)?;
        Self::from_plist(value)
    }

    fn from_plist(value: plist::Value) -> Result<Self, ProbeError> {
        match plist_to_json(&value) {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(ProbeError::parse("install report is not a dictionary")),
        }
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    fn items(&self, key: &str) -> &[Value] {
        self.get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Hardware and OS facts from `MachineInfo`; empty when Munki has none
    pub fn system_facts(&self) -> FactSet {
        let mut facts = FactSet::new();
        let machine = match self.get("MachineInfo").and_then(Value::as_object) {
            Some(m) if !m.is_empty() => m,
            _ => return facts,
        };

        let field = |key: &str| machine.get(key).cloned().unwrap_or(Value::Null);
        let memory_gb = machine
            .get("physical_memory")
            .and_then(Value::as_u64)
            .map(|kb| kb / (1024 * 1024));

        facts.insert(
            "hardware".into(),
            json!({
                "model": field("machine_model"),
                "serial_number": field("serial_number"),
                "processor": field("arch"),
                "memory_gb": memory_gb,
            }),
        );
        facts.insert(
            "os".into(),
            json!({
                "os_version": field("os_vers"),
                "os_build": field("os_build_number"),
                "architecture": field("arch"),
            }),
        );
        facts.insert(
            "munki_info".into(),
            json!({
                "manifest": self.get("ManifestName").cloned(),
                "last_run": self.get("EndTime").cloned(),
                "version": self.get("ManagedInstallVersion").cloned(),
            }),
        );
        facts
    }

    /// Software inventory from `ManagedInstalls` and `InstalledItems`
    pub fn inventory(&self) -> FactSet {
        let mut facts = FactSet::new();
        let managed = self.items("ManagedInstalls");
        let mut items: Vec<Value> = managed
            .iter()
            .map(|item| {
                json!({
                    "name": first_string(item, &["display_name", "name"]),
                    "version": first_string(item, &["version_to_install", "installed_version"]),
                    "installed": item.get("installed").and_then(Value::as_bool).unwrap_or(false),
                    "managed": true,
                    "source": "munki",
                })
            })
            .collect();

        for name in self.items("InstalledItems").iter().filter_map(Value::as_str) {
            let duplicate = items.iter().any(|i| i["name"].as_str() == Some(name));
            if !duplicate {
                items.push(json!({ "name": name, "managed": false, "source": "munki" }));
            }
        }

        if items.is_empty() {
            return facts;
        }

        facts.insert("method".into(), json!("munki"));
        facts.insert("total_count".into(), json!(items.len()));
        facts.insert("managed_count".into(), json!(managed.len()));
        facts.insert("items".into(), Value::Array(items));
        facts.insert(
            "last_munki_run".into(),
            self.get("EndTime").cloned().unwrap_or(Value::Null),
        );
        facts.insert("pending_updates".into(), self.pending_updates());
        facts
    }

    /// Items Munki will install or remove on its next run
    pub fn pending_updates(&self) -> Value {
        let summarize = |key: &str, version_key: &str| -> Vec<Value> {
            self.items(key)
                .iter()
                .map(|item| {
                    json!({
                        "name": first_string(item, &["display_name", "name"]),
                        "version": item.get(version_key).cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        };

        let to_install = summarize("ItemsToInstall", "version_to_install");
        let to_remove = summarize("ItemsToRemove", "installed_version");
        let apple_updates: Vec<Value> = self
            .items("AppleUpdates")
            .iter()
            .map(|update| {
                let restart = update
                    .get("RestartAction")
                    .and_then(Value::as_str)
                    .map(|a| a != "None")
                    .unwrap_or(false);
                json!({
                    "name": first_string(update, &["display_name", "name"]),
                    "version": update.get("version_to_install").cloned().unwrap_or(Value::Null),
                    "restart_required": restart,
                })
            })
            .collect();

        json!({
            "pending_count": to_install.len() + to_remove.len() + apple_updates.len(),
            "items_to_install": to_install,
            "items_to_remove": to_remove,
            "apple_updates": apple_updates,
        })
    }
}

fn first_string(item: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
        .unwrap_or(Value::Null)
}

fn plist_error(path: &Path, err: plist::Error) -> ProbeError {
    match err.as_io() {
        Some(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
            ProbeError::permission_denied(format!("{}: {}", path.display(), io))
        }
        Some(io) => ProbeError::command_failed(format!("{}: {}", path.display(), io)),
        None => ProbeError::parse(format!("{}: {}", path.display(), err)),
    }
}

/// Parse XML or binary plist bytes
pub fn parse_plist(bytes: &[u8]) -> Result<plist::Value, ProbeError> {
    plist::Value::from_reader(std::io::Cursor::new(bytes))
        .map_err(|e| ProbeError::parse(format!("invalid plist: {}", e)))
}

/// Convert a plist value into JSON. Dates become RFC 3339 strings, binary
/// data is reported by size only.
pub fn plist_to_json(value: &plist::Value) -> Value {
    match value {
        plist::Value::Array(items) => Value::Array(items.iter().map(plist_to_json).collect()),
        plist::Value::Dictionary(dict) => Value::Object(
            dict.iter()
                .map(|(k, v)| (k.clone(), plist_to_json(v)))
                .collect(),
        ),
        plist::Value::Boolean(b) => Value::Bool(*b),
        plist::Value::Data(bytes) => json!({ "data_bytes": bytes.len() }),
        plist::Value::Date(date) => {
            let time: SystemTime = (*date).into();
            Value::String(chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339())
        }
        plist::Value::Real(r) => json!(r),
        plist::Value::Integer(i) => match (i.as_signed(), i.as_unsigned()) {
            (Some(s), _) => json!(s),
            (None, Some(u)) => json!(u),
            _ => Value::Null,
        },
        plist::Value::String(s) => Value::String(s.clone()),
        plist::Value::Uid(uid) => json!(uid.get()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>EndTime</key>
    <date>2025-10-28T09:15:00Z</date>
    <key>ManifestName</key>
    <string>site_default</string>
    <key>ManagedInstallVersion</key>
    <string>6.5.1</string>
    <key>MachineInfo</key>
    <dict>
        <key>machine_model</key>
        <string>MacBookPro18,3</string>
        <key>serial_number</key>
        <string>C02XK1ABCD12</string>
        <key>arch</key>
        <string>arm64</string>
        <key>physical_memory</key>
        <integer>16777216</integer>
        <key>os_vers</key>
        <string>14.6.1</string>
        <key>os_build_number</key>
        <string>23G93</string>
    </dict>
    <key>ManagedInstalls</key>
    <array>
        <dict>
            <key>display_name</key>
            <string>Google Chrome</string>
            <key>installed_version</key>
            <string>130.0.6723.70</string>
            <key>installed</key>
            <true/>
        </dict>
        <dict>
            <key>name</key>
            <string>Slack</string>
            <key>version_to_install</key>
            <string>4.41.97</string>
            <key>installed</key>
            <false/>
        </dict>
    </array>
    <key>InstalledItems</key>
    <array>
        <string>Google Chrome</string>
        <string>Zoom</string>
    </array>
    <key>ItemsToInstall</key>
    <array>
        <dict>
            <key>name</key>
            <string>Slack</string>
            <key>version_to_install</key>
            <string>4.41.97</string>
        </dict>
    </array>
    <key>AppleUpdates</key>
    <array>
        <dict>
            <key>display_name</key>
            <string>macOS Sonoma 14.7</string>
            <key>RestartAction</key>
            <string>RequireRestart</string>
        </dict>
    </array>
</dict>
</plist>"#;

    const EMPTY_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>MachineInfo</key><dict/></dict></plist>"#;

    #[test]
    fn test_system_facts_from_machine_info() {
        let report = ManagedReport::from_bytes(REPORT.as_bytes()).unwrap();
        let facts = report.system_facts();
        assert_eq!(facts["hardware"]["model"], "MacBookPro18,3");
        assert_eq!(facts["hardware"]["memory_gb"], 16);
        assert_eq!(facts["os"]["os_build"], "23G93");
        assert_eq!(facts["munki_info"]["manifest"], "site_default");
        assert!(facts["munki_info"]["last_run"]
            .as_str()
            .unwrap()
            .starts_with("2025-10-28T09:15:00"));
    }

    #[test]
    fn test_empty_machine_info_means_absent() {
        let report = ManagedReport::from_bytes(EMPTY_REPORT.as_bytes()).unwrap();
        assert!(report.system_facts().is_empty());
        assert!(report.inventory().is_empty());
    }

    #[test]
    fn test_inventory_deduplicates_installed_items() {
        let report = ManagedReport::from_bytes(REPORT.as_bytes()).unwrap();
        let inventory = report.inventory();
        let names: Vec<&str> = inventory["items"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|i| i["name"].as_str())
            .collect();
        assert_eq!(names, vec!["Google Chrome", "Slack", "Zoom"]);
        assert_eq!(inventory["managed_count"], 2);
        assert_eq!(inventory["total_count"], 3);
        assert_eq!(inventory["items"][1]["version"], "4.41.97");
    }

    #[test]
    fn test_pending_updates() {
        let report = ManagedReport::from_bytes(REPORT.as_bytes()).unwrap();
        let pending = report.pending_updates();
        assert_eq!(pending["pending_count"], 2);
        assert_eq!(pending["apple_updates"][0]["restart_required"], true);
        assert_eq!(pending["items_to_install"][0]["name"], "Slack");
    }

    #[test]
    fn test_load_report_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ManagedInstallReport.plist");
        std::fs::write(&path, REPORT).unwrap();

        let source = MunkiSource::with_report(&path);
        assert!(source.is_installed());
        let report = source.load_report().unwrap();
        assert!(!report.system_facts().is_empty());
    }

    #[test]
    fn test_unavailable_source_errors() {
        let err = MunkiSource::unavailable().load_report().unwrap_err();
        assert_eq!(err.kind, crate::error::ProviderErrorKind::CommandFailed);
    }

    #[test]
    fn test_garbage_report_is_parse_error() {
        let err = ManagedReport::from_bytes(b"<?xml version=\"1.0\"?><plist><dict><key>x</key>").unwrap_err();
        assert_eq!(err.kind, crate::error::ProviderErrorKind::ParseFailed);
    }
}
