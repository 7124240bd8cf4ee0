//! Resource usage sampling.
//!
//! Per-process samples locate the server's java process by matching the
//! internal name in the process table; no matching process is the valid
//! `NotRunning` answer, not an error. Host-wide samples combine load
//! averages, memory, and root filesystem usage from standalone
//! pipelines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::{Error, Result};

use super::{exec_checked, shell};

/// Resource sample for one server process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessMetrics {
    /// No process matches the internal name
    NotRunning,
    /// The matched process and its usage
    Running {
        /// CPU usage in percent
        cpu_percent: f32,
        /// Resident memory in percent of host memory
        memory_percent: f32,
        /// Time since the process started
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },
}

/// Host-wide resource sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    /// 1-minute load average
    pub load_1m: f32,
    /// 5-minute load average
    pub load_5m: f32,
    /// 15-minute load average
    pub load_15m: f32,
    /// Total memory in bytes
    pub memory_total_bytes: u64,
    /// Used memory in bytes
    pub memory_used_bytes: u64,
    /// Root filesystem size in bytes
    pub disk_total_bytes: u64,
    /// Root filesystem usage in bytes
    pub disk_used_bytes: u64,
}

const LOADAVG_CMD: &str = "cat /proc/loadavg";
const FREE_CMD: &str = "free -b";
const DF_CMD: &str = "df -P /";

/// Renders the process-table sample for a server. The trailing `|| true`
/// keeps the exit code zero when nothing matches.
pub fn render_process_sample(internal_name: &str) -> String {
    format!(
        "ps -eo pcpu=,pmem=,etimes=,args= | grep -F -- {} | grep -v grep || true",
        shell::quote(internal_name)
    )
}

/// Parses the process sample. Wrapper launches match twice (the shell
/// wrapper and the java child); the busiest match is the server itself.
pub fn parse_process_sample(stdout: &str) -> ProcessMetrics {
    let mut best: Option<(f32, f32, u64)> = None;
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (Ok(cpu), Ok(mem), Ok(elapsed)) = (
            fields[0].parse::<f32>(),
            fields[1].parse::<f32>(),
            fields[2].parse::<u64>(),
        ) else {
            continue;
        };
        if best.map_or(true, |(prev, _, _)| cpu > prev) {
            best = Some((cpu, mem, elapsed));
        }
    }

    match best {
        Some((cpu_percent, memory_percent, secs)) => ProcessMetrics::Running {
            cpu_percent,
            memory_percent,
            elapsed: Duration::from_secs(secs),
        },
        None => ProcessMetrics::NotRunning,
    }
}

/// Samples the server process matching the internal name.
pub async fn process_metrics(
    conn: &dyn Connection,
    internal_name: &str,
    timeout: Duration,
) -> Result<ProcessMetrics> {
    let output = exec_checked(conn, &render_process_sample(internal_name), timeout).await?;
    Ok(parse_process_sample(&output.stdout))
}

/// Samples host-wide load, memory, and disk usage.
pub async fn host_metrics(conn: &dyn Connection, timeout: Duration) -> Result<HostMetrics> {
    let loadavg = exec_checked(conn, LOADAVG_CMD, timeout).await?;
    let (load_1m, load_5m, load_15m) = parse_loadavg(&loadavg.stdout)?;

    let free = exec_checked(conn, FREE_CMD, timeout).await?;
    let (memory_total_bytes, memory_used_bytes) = parse_free_bytes(&free.stdout)?;

    let df = exec_checked(conn, DF_CMD, timeout).await?;
    let (disk_total_bytes, disk_used_bytes) = parse_df_bytes(&df.stdout)?;

    Ok(HostMetrics {
        load_1m,
        load_5m,
        load_15m,
        memory_total_bytes,
        memory_used_bytes,
        disk_total_bytes,
        disk_used_bytes,
    })
}

fn parse_loadavg(stdout: &str) -> Result<(f32, f32, f32)> {
    let fields: Vec<&str> = stdout.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(metrics_error("short /proc/loadavg", stdout));
    }
    let parse = |s: &str| {
        s.parse::<f32>()
            .map_err(|_| metrics_error("unparseable load average", stdout))
    };
    Ok((parse(fields[0])?, parse(fields[1])?, parse(fields[2])?))
}

/// Parses the `Mem:` row of `free -b`: total and used in bytes.
fn parse_free_bytes(stdout: &str) -> Result<(u64, u64)> {
    let line = stdout
        .lines()
        .find(|l| l.starts_with("Mem:"))
        .ok_or_else(|| metrics_error("no Mem row in free output", stdout))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(metrics_error("short Mem row", line));
    }
    let total = fields[1]
        .parse()
        .map_err(|_| metrics_error("unparseable Mem total", line))?;
    let used = fields[2]
        .parse()
        .map_err(|_| metrics_error("unparseable Mem used", line))?;
    Ok((total, used))
}

/// Parses the data row of `df -P /`: 1K blocks, converted to bytes.
fn parse_df_bytes(stdout: &str) -> Result<(u64, u64)> {
    let line = stdout
        .lines()
        .nth(1)
        .ok_or_else(|| metrics_error("df produced no data line", stdout))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(metrics_error("short df line", line));
    }
    let total: u64 = fields[1]
        .parse()
        .map_err(|_| metrics_error("unparseable df total", line))?;
    let used: u64 = fields[2]
        .parse()
        .map_err(|_| metrics_error("unparseable df used", line))?;
    Ok((total * 1024, used * 1024))
}

fn metrics_error(what: &str, raw: &str) -> Error {
    Error::Internal(format!("metrics sample failed: {what}: {:?}", raw.trim()))
}
