//! Security posture checks
//!
//! Each control is an independent check. A check that cannot run is
//! recorded as `{"error": ...}` under its key; the provider only fails when
//! every check failed.

use serde_json::{json, Value};

use crate::command::CommandRunner;
use crate::error::{ProbeError, ProviderError};
use crate::facts::{CheckSet, FactProvider, FactSet};

const SOCKETFILTERFW: &str = "/usr/libexec/ApplicationFirewall/socketfilterfw";
const LOGINWINDOW_PREFS: &str = "/Library/Preferences/com.apple.loginwindow";

pub struct SecurityStatusProvider {
    runner: CommandRunner,
}

impl SecurityStatusProvider {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn filevault(&self) -> Result<Value, ProbeError> {
        self.runner.run("fdesetup", &["status"]).map(|o| parse_filevault(&o))
    }

    fn sip(&self) -> Result<Value, ProbeError> {
        self.runner.run("csrutil", &["status"]).map(|o| parse_sip(&o))
    }

    fn firewall(&self) -> Result<Value, ProbeError> {
        let global = self.runner.run(SOCKETFILTERFW, &["--getglobalstate"])?;
        let stealth = self.runner.run(SOCKETFILTERFW, &["--getstealthmode"]).ok();
        Ok(parse_firewall(&global, stealth.as_deref()))
    }

    fn gatekeeper(&self) -> Result<Value, ProbeError> {
        // spctl exits 1 when assessments are disabled
        let output = self.runner.output("spctl", &["--status"])?;
        let text = if output.stdout.trim().is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(parse_gatekeeper(&text))
    }

    fn remote_login(&self) -> Result<Value, ProbeError> {
        self.runner
            .run("systemsetup", &["-getremotelogin"])
            .map(|o| parse_remote_login(&o))
    }

    fn screen_sharing(&self) -> Result<Value, ProbeError> {
        self.runner
            .run("launchctl", &["list"])
            .map(|o| parse_screen_sharing(&o))
    }

    fn auto_login(&self) -> Result<Value, ProbeError> {
        // A missing key makes `defaults read` exit non-zero
        let output = self
            .runner
            .output("defaults", &["read", LOGINWINDOW_PREFS, "autoLoginUser"])?;
        let user = output.success().then_some(output.stdout.as_str());
        Ok(parse_auto_login(user))
    }
}

impl FactProvider for SecurityStatusProvider {
    fn name(&self) -> &str {
        "security_status"
    }

    fn collect(&self) -> Result<FactSet, ProviderError> {
        let mut checks = CheckSet::new();
        checks.record("filevault", self.filevault());
        checks.record("sip", self.sip());
        checks.record("firewall", self.firewall());
        checks.record("gatekeeper", self.gatekeeper());
        checks.record("remote_login", self.remote_login());
        checks.record("screen_sharing", self.screen_sharing());
        checks.record("auto_login", self.auto_login());
        checks.finish(self.name())
    }
}

fn says_enabled(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("enabled") && !lower.contains("disabled")
}

pub fn parse_filevault(output: &str) -> Value {
    let encrypting = output.contains("Encryption in progress");
    json!({
        "enabled": output.contains("FileVault is On") || encrypting,
        "encrypting": encrypting,
        "status": output.trim(),
    })
}

pub fn parse_sip(output: &str) -> Value {
    json!({
        "enabled": says_enabled(output),
        "status": output.trim(),
    })
}

pub fn parse_firewall(global: &str, stealth: Option<&str>) -> Value {
    let stealth_mode = stealth.map(|s| {
        let lower = s.to_lowercase();
        lower.contains("mode is on") || says_enabled(s)
    });
    // "(State = 2)" means block all incoming connections
    let block_all = global.contains("State = 2") || global.to_lowercase().contains("block all");
    json!({
        "enabled": says_enabled(global) || block_all,
        "block_all": block_all,
        "stealth_mode": stealth_mode,
        "status": global.trim(),
    })
}

pub fn parse_gatekeeper(output: &str) -> Value {
    json!({
        "enabled": output.to_lowercase().contains("assessments enabled"),
        "status": output.trim(),
    })
}

pub fn parse_remote_login(output: &str) -> Value {
    let enabled = output
        .rsplit(':')
        .next()
        .map(|v| v.trim().eq_ignore_ascii_case("on"))
        .unwrap_or(false);
    json!({
        "enabled": enabled,
        "risk": if enabled { "medium" } else { "none" },
    })
}

pub fn parse_screen_sharing(launchctl_list: &str) -> Value {
    let enabled = launchctl_list.contains("com.apple.screensharing");
    json!({
        "enabled": enabled,
        "risk": if enabled { "high" } else { "none" },
    })
}

/// `user` is the `autoLoginUser` value, `None` when the key is absent
pub fn parse_auto_login(user: Option<&str>) -> Value {
    let user = user
        .map(str::trim)
        .filter(|u| !u.is_empty() && !u.to_lowercase().contains("does not exist"));
    json!({
        "enabled": user.is_some(),
        "user": user,
        "risk": if user.is_some() { "critical" } else { "none" },
    })
}
