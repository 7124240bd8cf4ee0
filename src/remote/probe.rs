//! Host capacity probing.
//!
//! Four independent one-line probes: total memory from `/proc/meminfo`,
//! core count from `nproc`, root filesystem size from `df`, and an OS
//! label from `/etc/os-release`. A failure in any one of them fails the
//! whole probe; partial capacity is never reported as success.

use std::time::Duration;

use tracing::debug;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::model::HostCapacity;

use super::exec_checked;

const MEMORY_CMD: &str = "grep MemTotal /proc/meminfo";
const CORES_CMD: &str = "nproc";
const DISK_CMD: &str = "df -Pm /";
const OS_CMD: &str = "cat /etc/os-release";

/// Probes the host's capacity. Runs the four sub-probes sequentially on
/// the given session.
pub async fn probe_capacity(conn: &dyn Connection, timeout: Duration) -> Result<HostCapacity> {
    let memory = exec_checked(conn, MEMORY_CMD, timeout).await?;
    let total_memory_mb = parse_meminfo(&memory.stdout)?;

    let cores = exec_checked(conn, CORES_CMD, timeout).await?;
    let cpu_cores = parse_nproc(&cores.stdout)?;

    let disk = exec_checked(conn, DISK_CMD, timeout).await?;
    let total_disk_mb = parse_df_total(&disk.stdout)?;

    let os = exec_checked(conn, OS_CMD, timeout).await?;
    let os_name = parse_os_release(&os.stdout)?;

    let capacity = HostCapacity {
        total_memory_mb,
        cpu_cores,
        total_disk_mb,
        os_name,
    };
    debug!(endpoint = %conn.identifier(), ?capacity, "Probed host capacity");
    Ok(capacity)
}

/// Parses `MemTotal:  16384000 kB` into megabytes.
fn parse_meminfo(stdout: &str) -> Result<u64> {
    let line = stdout
        .lines()
        .find(|l| l.starts_with("MemTotal:"))
        .ok_or_else(|| probe_error("MemTotal missing from /proc/meminfo", stdout))?;
    let kb: u64 = line
        .split_whitespace()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| probe_error("unparseable MemTotal line", line))?;
    Ok(kb / 1024)
}

fn parse_nproc(stdout: &str) -> Result<u32> {
    stdout
        .trim()
        .parse()
        .map_err(|_| probe_error("unparseable nproc output", stdout))
}

/// Parses the second line of `df -Pm /`; the second column is the total
/// size in megabytes.
fn parse_df_total(stdout: &str) -> Result<u64> {
    let line = stdout
        .lines()
        .nth(1)
        .ok_or_else(|| probe_error("df produced no data line", stdout))?;
    line.split_whitespace()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| probe_error("unparseable df line", line))
}

/// Picks a human-readable label out of `/etc/os-release`, preferring
/// `PRETTY_NAME` over `NAME`.
fn parse_os_release(stdout: &str) -> Result<String> {
    let mut name = None;
    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim_matches('"');
            match key {
                "PRETTY_NAME" if !value.is_empty() => return Ok(value.to_string()),
                "NAME" if !value.is_empty() => name = Some(value.to_string()),
                _ => {}
            }
        }
    }
    name.ok_or_else(|| probe_error("no usable name in /etc/os-release", stdout))
}

fn probe_error(what: &str, raw: &str) -> Error {
    Error::Internal(format!("host probe failed: {what}: {:?}", raw.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meminfo_converts_to_megabytes() {
        assert_eq!(parse_meminfo("MemTotal:       16315372 kB\n").unwrap(), 15932);
        assert_eq!(parse_meminfo("MemTotal: 1024 kB").unwrap(), 1);
    }

    #[test]
    fn meminfo_rejects_garbage() {
        assert!(parse_meminfo("").is_err());
        assert!(parse_meminfo("MemFree: 123 kB").is_err());
        assert!(parse_meminfo("MemTotal: lots").is_err());
    }

    #[test]
    fn nproc_parses_core_count() {
        assert_eq!(parse_nproc("8\n").unwrap(), 8);
        assert!(parse_nproc("eight").is_err());
    }

    #[test]
    fn df_reads_the_total_column() {
        let out = "Filesystem     1048576-blocks  Used Available Capacity Mounted on\n\
                   /dev/vda1              80334 21520     58798      27% /\n";
        assert_eq!(parse_df_total(out).unwrap(), 80334);
    }

    #[test]
    fn df_without_data_line_fails() {
        assert!(parse_df_total("Filesystem 1048576-blocks Used\n").is_err());
    }

    #[test]
    fn os_release_prefers_pretty_name() {
        let out = "NAME=\"Ubuntu\"\nPRETTY_NAME=\"Ubuntu 24.04.1 LTS\"\nID=ubuntu\n";
        assert_eq!(parse_os_release(out).unwrap(), "Ubuntu 24.04.1 LTS");
    }

    #[test]
    fn os_release_falls_back_to_name() {
        let out = "NAME=\"Debian GNU/Linux\"\nID=debian\n";
        assert_eq!(parse_os_release(out).unwrap(), "Debian GNU/Linux");
        assert!(parse_os_release("ID=mystery\n").is_err());
    }
}
