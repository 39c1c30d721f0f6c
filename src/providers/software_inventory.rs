//! Installed software inventory
//!
//! Hybrid provider: Munki's managed installs when available, otherwise
//! `system_profiler SPApplicationsDataType` capped at [`MAX_APPLICATIONS`]
//! items. Homebrew packages are always probed directly, and the
//! critical-software summary is computed over the merged inventory.

use serde_json::{json, Value};

use crate::command::CommandRunner;
use crate::error::{ProbeError, ProviderError};
use crate::facts::{FactProvider, FactSet};
use crate::hybrid::HybridSourceResolver;
use crate::munki::MunkiSource;

pub const MAX_APPLICATIONS: usize = 100;

const BROWSERS: &[(&str, &[&str])] = &[
    ("chrome", &["chrome"]),
    ("firefox", &["firefox"]),
    ("safari", &["safari"]),
    ("edge", &["microsoft edge"]),
];

const SECURITY: &[(&str, &[&str])] = &[
    ("antivirus", &["crowdstrike", "sentinel", "sophos", "malwarebytes"]),
    ("vpn", &["zscaler", "globalprotect", "cisco anyconnect", "cisco secure client", "openvpn"]),
    ("password_manager", &["1password", "lastpass", "dashlane", "bitwarden"]),
];

const PRODUCTIVITY: &[(&str, &[&str])] = &[
    ("office", &["microsoft office", "microsoft word", "microsoft excel"]),
    ("slack", &["slack"]),
    ("zoom", &["zoom"]),
    ("teams", &["microsoft teams"]),
];

pub struct SoftwareInventoryProvider {
    runner: CommandRunner,
    munki: MunkiSource,
    resolver: HybridSourceResolver,
}

impl SoftwareInventoryProvider {
    pub fn new(runner: CommandRunner, munki: MunkiSource) -> Self {
        Self {
            runner,
            munki,
            resolver: HybridSourceResolver::new("software_inventory"),
        }
    }

    fn managed_inventory(&self) -> Result<FactSet, ProbeError> {
        self.munki.load_report().map(|report| report.inventory())
    }

    fn profiler_inventory(&self) -> Result<FactSet, ProbeError> {
        let items = super::system_profiler(&self.runner, "SPApplicationsDataType")?;
        Ok(parse_applications(&items))
    }

    fn homebrew(&self) -> FactSet {
        let mut facts = FactSet::new();
        if !self.runner.exists("brew") {
            return facts;
        }
        match self.runner.run("brew", &["list", "--versions"]) {
            Ok(output) => {
                let packages = parse_brew_list(&output);
                if !packages.is_empty() {
                    facts.insert("homebrew_count".into(), json!(packages.len()));
                    facts.insert("homebrew_packages".into(), Value::Array(packages));
                }
            }
            Err(e) => log::warn!("homebrew listing failed: {}", e),
        }
        facts
    }
}

impl FactProvider for SoftwareInventoryProvider {
    fn name(&self) -> &str {
        "software_inventory"
    }

    fn collect(&self) -> Result<FactSet, ProviderError> {
        let resolution = self.resolver.resolve(
            || self.managed_inventory(),
            || self.profiler_inventory(),
            || self.homebrew(),
        )?;

        let mut facts = resolution.facts;
        let critical = critical_software(&facts);
        facts.insert("critical_software".into(), critical);
        facts.insert("collection_method".into(), json!(resolution.source.to_string()));
        facts.insert("munki_available".into(), json!(self.munki.is_installed()));
        Ok(facts)
    }
}

/// `SPApplicationsDataType` items -> inventory facts, capped
pub fn parse_applications(apps: &[Value]) -> FactSet {
    let items: Vec<Value> = apps
        .iter()
        .filter_map(|app| {
            let name = app.get("_name").and_then(Value::as_str)?;
            let version = app.get("version").and_then(Value::as_str)?;
            Some(json!({
                "name": name,
                "version": version,
                "obtained_from": app.get("obtained_from").cloned().unwrap_or(Value::Null),
                "last_modified": app.get("lastModified").cloned().unwrap_or(Value::Null),
                "source": "system_profiler",
            }))
        })
        .collect();

    let total = items.len();
    let mut facts = FactSet::new();
    facts.insert("method".into(), json!("system_profiler"));
    facts.insert("total_count".into(), json!(total));
    if total > MAX_APPLICATIONS {
        facts.insert(
            "note".into(),
            json!(format!("limited to first {} applications", MAX_APPLICATIONS)),
        );
    }
    facts.insert(
        "items".into(),
        Value::Array(items.into_iter().take(MAX_APPLICATIONS).collect()),
    );
    facts
}

/// `brew list --versions`: `name version [version...]` per line
pub fn parse_brew_list(output: &str) -> Vec<Value> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let versions: Vec<&str> = parts.collect();
            if versions.is_empty() {
                return None;
            }
            Some(json!({
                "name": name,
                "version": versions.join(" "),
                "source": "homebrew",
            }))
        })
        .collect()
}

/// Presence of well-known browsers, security and productivity software
pub fn critical_software(inventory: &FactSet) -> Value {
    let names: Vec<String> = ["items", "homebrew_packages"]
        .iter()
        .filter_map(|key| inventory.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(|item| item.get("name").and_then(Value::as_str))
        .map(str::to_lowercase)
        .collect();

    let summarize = |table: &[(&str, &[&str])]| -> Value {
        let map: serde_json::Map<String, Value> = table
            .iter()
            .map(|(label, needles)| {
                let present = names
                    .iter()
                    .any(|name| needles.iter().any(|needle| name.contains(needle)));
                (label.to_string(), Value::Bool(present))
            })
            .collect();
        Value::Object(map)
    };

    json!({
        "browsers": summarize(BROWSERS),
        "security": summarize(SECURITY),
        "productivity": summarize(PRODUCTIVITY),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>ManagedInstalls</key>
    <array>
        <dict>
            <key>name</key>
            <string>GoogleChrome</string>
            <key>display_name</key>
            <string>Google Chrome</string>
            <key>installed_version</key>
            <string>130.0.6723.70</string>
            <key>installed</key>
            <true/>
        </dict>
        <dict>
            <key>name</key>
            <string>1Password8</string>
            <key>installed_version</key>
            <string>8.10.48</string>
        </dict>
    </array>
    <key>InstalledItems</key>
    <array>
        <string>Google Chrome</string>
        <string>Slack</string>
    </array>
</dict>
</plist>"#;

    #[test]
    fn test_managed_inventory_preferred() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(REPORT.as_bytes()).unwrap();
        let provider = SoftwareInventoryProvider::new(
            CommandRunner::default(),
            MunkiSource::with_report(file.path()),
        );

        let facts = provider.collect().unwrap();
        assert_eq!(facts["collection_method"], "munki");
        assert_eq!(facts["munki_available"], true);
        assert_eq!(facts["total_count"], 3);
        assert_eq!(facts["managed_count"], 2);
        let critical = &facts["critical_software"];
        assert_eq!(critical["browsers"]["chrome"], true);
        assert_eq!(critical["browsers"]["firefox"], false);
        assert_eq!(critical["security"]["password_manager"], true);
        assert_eq!(critical["productivity"]["slack"], true);
    }

    #[test]
    fn test_parse_applications_caps_items() {
        let apps: Vec<Value> = (0..130)
            .map(|i| json!({ "_name": format!("App {}", i), "version": "1.0" }))
            .chain(std::iter::once(json!({ "_name": "No Version" })))
            .collect();
        let facts = parse_applications(&apps);
        assert_eq!(facts["total_count"], 130);
        assert_eq!(facts["items"].as_array().unwrap().len(), MAX_APPLICATIONS);
        assert!(facts.contains_key("note"));
    }

    #[test]
    fn test_parse_applications_small_list_has_no_note() {
        let facts = parse_applications(&[json!({ "_name": "Safari", "version": "18.1", "obtained_from": "apple" })]);
        assert_eq!(facts["items"][0]["obtained_from"], "apple");
        assert!(!facts.contains_key("note"));
    }

    #[test]
    fn test_parse_brew_list() {
        let packages = parse_brew_list("git 2.47.0\nopenssl@3 3.4.0 3.3.2\nlonely\n\n");
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[1]["version"], "3.4.0 3.3.2");
        assert_eq!(packages[0]["source"], "homebrew");
    }

    #[test]
    fn test_critical_software_includes_homebrew() {
        let mut inventory = FactSet::new();
        inventory.insert("items".into(), json!([{ "name": "Zoom.us" }]));
        inventory.insert("homebrew_packages".into(), json!([{ "name": "openvpn" }]));
        let critical = critical_software(&inventory);
        assert_eq!(critical["productivity"]["zoom"], true);
        assert_eq!(critical["security"]["vpn"], true);
        assert_eq!(critical["security"]["antivirus"], false);
    }
}
