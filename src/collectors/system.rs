use crate::collectors::run_command;
use std::time::Duration;
use sysinfo::{CpuExt, CpuRefreshKind, RefreshKind, System, SystemExt};
use tracing::warn;

pub const DISK_ERROR: &str = "Could not retrieve disk usage";

// sysinfo needs two samples to report CPU usage.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceSnapshot {
    pub cpu_mem: Vec<String>,
    pub disk: DiskReport,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum DiskReport {
    Lines(Vec<String>),
    Error(String),
}

// A failing `df` only degrades the disk field.
pub async fn collect_resource_snapshot(df_program: &str, timeout: Duration) -> ResourceSnapshot {
    let (cpu_mem, disk) = tokio::join!(collect_cpu_mem(), collect_disk(df_program, timeout));
    ResourceSnapshot { cpu_mem, disk }
}

async fn collect_cpu_mem() -> Vec<String> {
    let mut system = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::new().with_cpu_usage())
            .with_memory(),
    );
    tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
    system.refresh_cpu();
    cpu_mem_lines(&system)
}

fn cpu_mem_lines(system: &System) -> Vec<String> {
    let cpus = system.cpus();
    let cpu_usage_percent = if cpus.is_empty() {
        0.0
    } else {
        let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
        (sum / cpus.len() as f32) as f64
    };
    let load = system.load_average();

    vec![
        format!(
            "CPU: {:.1}% used across {} cores",
            cpu_usage_percent,
            cpus.len()
        ),
        format!(
            "Load average: {:.2} {:.2} {:.2}",
            load.one, load.five, load.fifteen
        ),
        format!(
            "Mem: {} used / {} total",
            human_bytes(system.used_memory()),
            human_bytes(system.total_memory())
        ),
        format!(
            "Swap: {} used / {} total",
            human_bytes(system.used_swap()),
            human_bytes(system.total_swap())
        ),
        format!("Uptime: {}", human_uptime(system.uptime())),
    ]
}

async fn collect_disk(program: &str, timeout: Duration) -> DiskReport {
    match run_command(program, &["-h"], timeout).await {
        Ok(stdout) => DiskReport::Lines(non_empty_lines(&stdout)),
        Err(err) => {
            warn!(error = %err, "disk usage probe failed");
            DiskReport::Error(DISK_ERROR.to_string())
        }
    }
}

pub(crate) fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn human_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else {
        format!("{hours}h {minutes}m")
    }
}
