//! Running-process facts: top CPU consumers, security tooling, load

use serde_json::{json, Value};

use crate::command::CommandRunner;
use crate::error::{ProbeError, ProviderError};
use crate::facts::{CheckSet, FactProvider, FactSet};

/// Endpoint security and network-control agents worth reporting
pub const SECURITY_PROCESSES: &[&str] = &[
    "CrowdStrike",
    "falcond",
    "SentinelAgent",
    "osqueryd",
    "Little Snitch",
    "LuLu",
    "BlockBlock",
    "KnockKnock",
    "ReiKey",
    "OverSight",
    "Santa",
    "Zscaler",
    "GlobalProtect",
    "Cisco AnyConnect",
];

const TOP_PROCESS_COUNT: usize = 5;

/// One `ps aux` row
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRow {
    pub user: String,
    pub pid: u32,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub command: String,
}

pub struct ProcessInfoProvider {
    runner: CommandRunner,
}

impl ProcessInfoProvider {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn load(&self) -> Result<Value, ProbeError> {
        let text = self.runner.run("uptime", &[])?;
        let (one, five, fifteen) = parse_load_average(&text)
            .ok_or_else(|| ProbeError::parse(format!("no load average in {:?}", text)))?;
        let cpus = num_cpus::get().max(1) as f64;
        Ok(json!({
            "load_1min": one,
            "load_5min": five,
            "load_15min": fifteen,
            "cpu_count": num_cpus::get(),
            "load_per_cpu": (one / cpus * 100.0).round() / 100.0,
        }))
    }

    fn launch_agents(&self) -> Result<Value, ProbeError> {
        let output = self.runner.run("launchctl", &["list"])?;
        let count = output.lines().skip(1).filter(|l| !l.trim().is_empty()).count();
        Ok(json!({ "loaded_count": count }))
    }
}

impl FactProvider for ProcessInfoProvider {
    fn name(&self) -> &str {
        "process_info"
    }

    fn collect(&self) -> Result<FactSet, ProviderError> {
        let mut checks = CheckSet::new();
        match self.runner.run("ps", &["aux"]).map(|o| parse_ps(&o)) {
            Ok(rows) => {
                checks.record("security_tools", Ok(security_tools(&rows)));
                checks.record("top_processes", Ok(top_processes(&rows, TOP_PROCESS_COUNT)));
                checks.insert("process_count", json!(rows.len()));
            }
            Err(e) => {
                checks.record("security_tools", Err(e.clone()));
                checks.record("top_processes", Err(e));
            }
        }
        checks.record("system_load", self.load());
        checks.record("launch_agents", self.launch_agents());
        checks.finish(self.name())
    }
}

/// Parse `ps aux`; rows that do not have all eleven columns are skipped
pub fn parse_ps(output: &str) -> Vec<ProcessRow> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 11 {
                return None;
            }
            Some(ProcessRow {
                user: parts[0].to_string(),
                pid: parts[1].parse().ok()?,
                cpu_percent: parts[2].parse().ok()?,
                mem_percent: parts[3].parse().ok()?,
                command: parts[10..].join(" "),
            })
        })
        .collect()
}

/// First matching process for each known security tool
pub fn security_tools(rows: &[ProcessRow]) -> Value {
    let found: Vec<Value> = SECURITY_PROCESSES
        .iter()
        .filter_map(|tool| {
            let needle = tool.to_lowercase();
            rows.iter()
                .find(|r| r.command.to_lowercase().contains(&needle))
                .map(|r| {
                    json!({
                        "name": tool,
                        "process": r.command,
                        "pid": r.pid,
                        "cpu_percent": r.cpu_percent,
                        "mem_percent": r.mem_percent,
                    })
                })
        })
        .collect();
    Value::Array(found)
}

pub fn top_processes(rows: &[ProcessRow], count: usize) -> Value {
    let mut sorted: Vec<&ProcessRow> = rows.iter().collect();
    sorted.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    Value::Array(
        sorted
            .into_iter()
            .take(count)
            .map(|r| {
                json!({
                    "pid": r.pid,
                    "user": r.user,
                    "command": r.command,
                    "cpu_percent": r.cpu_percent,
                    "mem_percent": r.mem_percent,
                })
            })
            .collect(),
    )
}

/// Handles both `load averages: 1.2 1.0 0.9` and `load average: 1.2, 1.0, 0.9`
pub fn parse_load_average(text: &str) -> Option<(f64, f64, f64)> {
    let (_, rest) = text.split_once("load average")?;
    let rest = rest.trim_start_matches('s').trim_start_matches(':');
    let mut values = rest
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok());
    Some((values.next()?, values.next()?, values.next()?))
}
