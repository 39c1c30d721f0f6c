//! Network configuration facts: interfaces, default route, DNS, VPN, proxy

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use crate::command::CommandRunner;
use crate::error::{ProbeError, ProviderError};
use crate::facts::{CheckSet, FactProvider, FactSet};

use super::value_after_colon;

pub struct NetworkInfoProvider {
    runner: CommandRunner,
}

impl NetworkInfoProvider {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn interfaces(&self) -> Result<Value, ProbeError> {
        self.runner.run("ifconfig", &[]).map(|o| parse_ifconfig(&o))
    }

    fn primary_interface(&self) -> Result<Value, ProbeError> {
        self.runner
            .run("route", &["-n", "get", "default"])
            .map(|o| parse_default_route(&o))
    }

    #[cfg(target_os = "macos")]
    fn dns(&self) -> Result<Value, ProbeError> {
        self.runner.run("scutil", &["--dns"]).map(|o| parse_scutil_dns(&o))
    }

    #[cfg(not(target_os = "macos"))]
    fn dns(&self) -> Result<Value, ProbeError> {
        let content = std::fs::read_to_string("/etc/resolv.conf")?;
        Ok(parse_resolv_conf(&content))
    }

    fn vpn(&self) -> Result<Value, ProbeError> {
        self.runner.run("scutil", &["--nc", "list"]).map(|o| parse_vpn_list(&o))
    }

    fn proxy(&self) -> Result<Value, ProbeError> {
        self.runner.run("scutil", &["--proxy"]).map(|o| parse_proxy(&o))
    }
}

impl FactProvider for NetworkInfoProvider {
    fn name(&self) -> &str {
        "network_info"
    }

    fn collect(&self) -> Result<FactSet, ProviderError> {
        let mut checks = CheckSet::new();
        checks.record("interfaces", self.interfaces());
        checks.record("primary_interface", self.primary_interface());
        checks.record("dns", self.dns());
        checks.record("vpn", self.vpn());
        checks.record("proxy", self.proxy());
        checks.finish(self.name())
    }
}

/// BSD `ifconfig` output -> one entry per interface
pub fn parse_ifconfig(output: &str) -> Value {
    let mut interfaces: Vec<Map<String, Value>> = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            let name = line.split(':').next().unwrap_or_default();
            let mut iface = Map::new();
            iface.insert("name".into(), json!(name));
            iface.insert(
                "status".into(),
                json!(if line.contains("<UP") || line.contains(",UP") { "up" } else { "down" }),
            );
            interfaces.push(iface);
            continue;
        }
        let Some(current) = interfaces.last_mut() else {
            continue;
        };
        let mut words = line.split_whitespace();
        match words.next() {
            Some("inet") => {
                if let Some(ip) = words.next() {
                    current.insert("ip_address".into(), json!(ip));
                }
            }
            Some("ether") => {
                if let Some(mac) = words.next() {
                    current.insert("mac_address".into(), json!(mac));
                }
            }
            _ => {}
        }
    }
    Value::Array(interfaces.into_iter().map(Value::Object).collect())
}

pub fn parse_default_route(output: &str) -> Value {
    let field = |key: &str| {
        output
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with(key))
            .and_then(value_after_colon)
    };
    json!({
        "interface": field("interface:"),
        "gateway": field("gateway:"),
    })
}

/// `scutil --dns`: unique nameservers and search domains across resolvers
pub fn parse_scutil_dns(output: &str) -> Value {
    let mut servers = BTreeSet::new();
    let mut domains = BTreeSet::new();
    for line in output.lines().map(str::trim) {
        if line.starts_with("nameserver") {
            servers.extend(value_after_colon(line));
        } else if line.starts_with("search domain") {
            domains.extend(value_after_colon(line));
        }
    }
    json!({
        "dns_servers": servers,
        "search_domains": domains,
    })
}

pub fn parse_resolv_conf(content: &str) -> Value {
    let mut servers = BTreeSet::new();
    let mut domains = BTreeSet::new();
    for line in content.lines().map(str::trim) {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("nameserver") => servers.extend(words.next()),
            Some("search") | Some("domain") => domains.extend(words),
            _ => {}
        }
    }
    json!({
        "dns_servers": servers,
        "search_domains": domains,
    })
}

/// `scutil --nc list`: connected or connecting services
///
/// `* (Connected)   <uuid> PPP --> L2TP   "Office VPN"   [PPP/L2TP]`
pub fn parse_vpn_list(output: &str) -> Value {
    let active: Vec<Value> = output
        .lines()
        .filter(|l| l.contains("(Connected)") || l.contains("(Connecting)"))
        .map(|line| {
            let status = between(line, '(', ')').unwrap_or("Connected");
            let name = between(line, '"', '"').unwrap_or_default();
            json!({ "name": name, "status": status })
        })
        .collect();
    json!({
        "vpn_active": !active.is_empty(),
        "active_vpns": active,
    })
}

fn between(line: &str, open: char, close: char) -> Option<&str> {
    let start = line.find(open)? + open.len_utf8();
    let len = line[start..].find(close)?;
    Some(&line[start..start + len])
}

pub fn parse_proxy(output: &str) -> Value {
    let lookup = |key: &str| {
        output.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            let v = v.trim();
            (k.trim() == key && !v.is_empty()).then(|| v.to_string())
        })
    };
    let http = lookup("HTTPProxy");
    let https = lookup("HTTPSProxy");
    let pac = lookup("ProxyAutoConfigURLString");
    let enabled = http.is_some() || https.is_some() || pac.is_some();
    json!({
        "http_proxy": http,
        "https_proxy": https,
        "pac_url": pac,
        "proxy_enabled": enabled,
    })
}
