use std::fmt::Write as _;
use std::future::ready;
use std::sync::Arc;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use steward_core::tool::{Tool, ToolOutput};

/// A point-in-time description of the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemSnapshot {
    /// Operating system name.
    pub os: String,
    /// CPU architecture.
    pub arch: String,
    /// Logical CPUs available to the process.
    pub cpu_count: usize,
    /// Total memory in bytes, if known.
    pub total_memory: Option<u64>,
    /// Available memory in bytes, if known.
    pub available_memory: Option<u64>,
    /// Seconds since boot, if known.
    pub uptime_secs: Option<u64>,
    /// The process working directory.
    pub working_dir: Option<String>,
}

/// A source of host information.
pub trait SystemProbe: Send + Sync + 'static {
    /// Takes a snapshot.
    fn snapshot(&self) -> SystemSnapshot;
}

/// Reads the host the process runs on. Memory and uptime come from
/// `/proc` and are only reported on Linux.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostProbe;

impl SystemProbe for HostProbe {
    fn snapshot(&self) -> SystemSnapshot {
        let meminfo = std::fs::read_to_string("/proc/meminfo").unwrap_or_default();
        let uptime = std::fs::read_to_string("/proc/uptime").unwrap_or_default();
        SystemSnapshot {
            os: host_os().to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
            cpu_count: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            total_memory: meminfo_bytes(&meminfo, "MemTotal"),
            available_memory: meminfo_bytes(&meminfo, "MemAvailable"),
            uptime_secs: uptime
                .split_whitespace()
                .next()
                .and_then(|secs| secs.parse::<f64>().ok())
                .map(|secs| secs as u64),
            working_dir: std::env::current_dir()
                .ok()
                .map(|dir| dir.display().to_string()),
        }
    }
}

#[inline]
fn host_os() -> &'static str {
    let os = std::env::consts::OS;
    match os {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "some other OS",
    }
}

/// Reads a `Key:   123 kB` line of `/proc/meminfo`.
fn meminfo_bytes(meminfo: &str, key: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name != key {
            return None;
        }
        let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kib * 1024)
    })
}

#[derive(Deserialize, JsonSchema)]
pub struct SystemInfoParameters {
    #[schemars(description = "What the user wants to know, optional.")]
    #[serde(default)]
    #[allow(dead_code)]
    query: Option<String>,
}

/// A tool that describes the host: OS, CPU, memory and uptime.
pub struct SystemInfoTool {
    parameter_schema: Value,
    probe: Arc<dyn SystemProbe>,
}

impl SystemInfoTool {
    /// Creates a tool backed by `probe`.
    pub fn new(probe: Arc<dyn SystemProbe>) -> Self {
        SystemInfoTool {
            parameter_schema: schema_for!(SystemInfoParameters).to_value(),
            probe,
        }
    }
}

impl Tool for SystemInfoTool {
    type Input = SystemInfoParameters;

    fn name(&self) -> &str {
        "system_info"
    }

    fn description(&self) -> &str {
        "Describes the host system: operating system, CPU, memory and uptime."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        _input: Self::Input,
    ) -> impl Future<Output = ToolOutput> + Send + 'static {
        ready(Ok(render(&self.probe.snapshot())))
    }
}

fn render(snapshot: &SystemSnapshot) -> String {
    const GIB: f64 = (1u64 << 30) as f64;

    let mut report = String::from("System information:\n");
    _ = writeln!(report, "OS: {}", snapshot.os);
    _ = writeln!(report, "Architecture: {}", snapshot.arch);
    _ = writeln!(report, "CPU cores: {}", snapshot.cpu_count);
    if let Some(total) = snapshot.total_memory {
        _ = writeln!(report, "Total memory: {:.2} GB", total as f64 / GIB);
        if let Some(available) = snapshot.available_memory {
            let used = total.saturating_sub(available) as f64 / total.max(1) as f64;
            _ = writeln!(
                report,
                "Available memory: {:.2} GB",
                available as f64 / GIB
            );
            _ = writeln!(report, "Memory usage: {:.1}%", used * 100.0);
        }
    }
    if let Some(uptime) = snapshot.uptime_secs {
        _ = writeln!(
            report,
            "Uptime: {}h {}m",
            uptime / 3600,
            uptime % 3600 / 60
        );
    }
    if let Some(dir) = &snapshot.working_dir {
        _ = writeln!(report, "Working directory: {dir}");
    }
    report.truncate(report.trim_end().len());
    report
}
