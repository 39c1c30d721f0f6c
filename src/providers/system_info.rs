//! Hardware, OS and uptime facts
//!
//! Hybrid provider: Munki's `MachineInfo` is used when the install report
//! has it, otherwise hardware and OS are probed directly. Uptime is never
//! tracked by Munki and is always probed.

use serde_json::{json, Value};

use crate::command::CommandRunner;
use crate::error::{ProbeError, ProviderError};
use crate::facts::{FactProvider, FactSet};
use crate::hybrid::HybridSourceResolver;
use crate::munki::MunkiSource;

pub struct SystemInfoProvider {
    runner: CommandRunner,
    munki: MunkiSource,
    resolver: HybridSourceResolver,
}

impl SystemInfoProvider {
    pub fn new(runner: CommandRunner, munki: MunkiSource) -> Self {
        Self {
            runner,
            munki,
            resolver: HybridSourceResolver::new("system_info"),
        }
    }

    fn managed_facts(&self) -> Result<FactSet, ProbeError> {
        self.munki.load_report().map(|report| report.system_facts())
    }

    fn direct_facts(&self) -> Result<FactSet, ProbeError> {
        let mut facts = FactSet::new();
        facts.insert("hardware".into(), self.hardware()?);
        facts.insert("os".into(), self.os());
        Ok(facts)
    }

    #[cfg(target_os = "macos")]
    fn hardware(&self) -> Result<Value, ProbeError> {
        let items = super::system_profiler(&self.runner, "SPHardwareDataType")?;
        items
            .first()
            .map(parse_hardware)
            .ok_or_else(|| ProbeError::parse("SPHardwareDataType returned no items"))
    }

    #[cfg(not(target_os = "macos"))]
    fn hardware(&self) -> Result<Value, ProbeError> {
        let memory_gb = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|m| parse_meminfo_gb(&m));
        Ok(json!({
            "processor_cores": num_cpus::get_physical(),
            "logical_processors": num_cpus::get(),
            "memory_gb": memory_gb,
        }))
    }

    #[cfg(target_os = "macos")]
    fn os(&self) -> Value {
        let version = self.runner.run("sw_vers", &["-productVersion"]).ok();
        let build = self.runner.run("sw_vers", &["-buildVersion"]).ok();
        let name = version
            .as_deref()
            .and_then(|v| v.split('.').next())
            .and_then(|m| m.parse::<u32>().ok())
            .map(macos_release_name)
            .unwrap_or("Unknown");
        json!({
            "os_version": version,
            "os_build": build,
            "os_name": format!("macOS {}", name),
            "kernel_version": self.runner.run("uname", &["-r"]).ok(),
            "architecture": std::env::consts::ARCH,
        })
    }

    #[cfg(not(target_os = "macos"))]
    fn os(&self) -> Value {
        let mut os = std::fs::read_to_string("/etc/os-release")
            .map(|content| parse_os_release(&content))
            .unwrap_or_else(|_| json!({}));
        if let Value::Object(map) = &mut os {
            map.insert(
                "kernel_version".into(),
                json!(self.runner.run("uname", &["-r"]).ok()),
            );
            map.insert("architecture".into(), json!(std::env::consts::ARCH));
        }
        os
    }

    #[cfg(target_os = "macos")]
    fn uptime(&self) -> FactSet {
        let mut uptime = FactSet::new();
        if let Ok(text) = self.runner.run("uptime", &[]) {
            uptime.insert("uptime".into(), json!(text));
        }
        if let Ok(text) = self.runner.run("sysctl", &["-n", "kern.boottime"]) {
            if let Some(boot) = parse_boottime(&text) {
                let now = chrono::Utc::now().timestamp().max(0) as u64;
                uptime.insert("boot_timestamp".into(), json!(boot));
                uptime.insert("uptime_seconds".into(), json!(now.saturating_sub(boot)));
            }
            uptime.insert("boot_time".into(), json!(text));
        }
        uptime
    }

    #[cfg(not(target_os = "macos"))]
    fn uptime(&self) -> FactSet {
        let mut uptime = FactSet::new();
        if let Some(secs) = std::fs::read_to_string("/proc/uptime")
            .ok()
            .and_then(|c| parse_proc_uptime(&c))
        {
            let boot = (chrono::Utc::now().timestamp().max(0) as u64).saturating_sub(secs);
            uptime.insert("uptime_seconds".into(), json!(secs));
            uptime.insert("boot_timestamp".into(), json!(boot));
        }
        uptime
    }
}

impl FactProvider for SystemInfoProvider {
    fn name(&self) -> &str {
        "system_info"
    }

    fn collect(&self) -> Result<FactSet, ProviderError> {
        let resolution = self.resolver.resolve(
            || self.managed_facts(),
            || self.direct_facts(),
            || {
                let mut always = FactSet::new();
                always.insert("uptime".into(), Value::Object(self.uptime()));
                always
            },
        )?;

        let mut facts = FactSet::new();
        facts.insert("collection_method".into(), json!(resolution.source.to_string()));
        facts.insert("munki_installed".into(), json!(self.munki.is_installed()));
        facts.extend(resolution.facts);
        Ok(facts)
    }
}

/// Hardware facts from one `SPHardwareDataType` item
pub fn parse_hardware(item: &Value) -> Value {
    let field = |key: &str| item.get(key).cloned().unwrap_or(Value::Null);
    let processor = item
        .get("chip_type")
        .or_else(|| item.get("cpu_type"))
        .cloned()
        .unwrap_or(Value::Null);
    let memory_gb = item
        .get("physical_memory")
        .and_then(Value::as_str)
        .and_then(|m| m.split_whitespace().next())
        .and_then(|n| n.parse::<u64>().ok());

    json!({
        "model": field("machine_model"),
        "model_name": field("machine_name"),
        "serial_number": field("serial_number"),
        "processor": processor,
        "processor_cores": field("number_processors"),
        "memory_gb": memory_gb,
        "boot_rom_version": field("boot_rom_version"),
        "smc_version": field("SMC_version_system"),
    })
}

/// Marketing name for a macOS major version
pub fn macos_release_name(major: u32) -> &'static str {
    match major {
        26 => "Tahoe",
        15 => "Sequoia",
        14 => "Sonoma",
        13 => "Ventura",
        12 => "Monterey",
        11 => "Big Sur",
        10 => "Catalina/Mojave/High Sierra/Sierra",
        _ => "Unknown",
    }
}

pub fn parse_os_release(content: &str) -> Value {
    let mut os = FactSet::new();
    for line in content.lines() {
        let (key, target) = if let Some(v) = line.strip_prefix("PRETTY_NAME=") {
            (v, "os_name")
        } else if let Some(v) = line.strip_prefix("VERSION_ID=") {
            (v, "os_version")
        } else if let Some(v) = line.strip_prefix("BUILD_ID=") {
            (v, "os_build")
        } else {
            continue;
        };
        os.insert(target.into(), json!(key.trim_matches('"')));
    }
    Value::Object(os)
}

/// `{ sec = 1730000000, usec = 0 } Mon Oct 27 ...` -> boot epoch seconds
pub fn parse_boottime(text: &str) -> Option<u64> {
    text.split("sec = ")
        .nth(1)
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}

pub fn parse_proc_uptime(content: &str) -> Option<u64> {
    content
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| secs as u64)
}

/// `MemTotal:  16318480 kB` -> whole GiB
pub fn parse_meminfo_gb(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|l| l.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / (1024 * 1024))
}
