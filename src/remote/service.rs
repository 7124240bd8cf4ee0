//! Systemd unit control.
//!
//! One server maps to one unit named after its internal name. Activity
//! is derived solely from the `is-active` probe string; log text is
//! never interpreted.

use std::time::Duration;

use tracing::debug;

use crate::connection::{into_crate_error, Connection};
use crate::error::Result;

use super::{exec, exec_checked, shell};

/// Where unit files are installed.
pub const UNIT_DIR: &str = "/etc/systemd/system";

/// State reported by `systemctl is-active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Unit is running
    Active,
    /// Unit is not running
    Inactive,
    /// Unit entered the failed state
    Failed,
    /// Activating, deactivating, or unknown to systemd
    Unknown,
}

impl ServiceState {
    /// True only for a positively running unit.
    pub fn is_active(self) -> bool {
        matches!(self, ServiceState::Active)
    }
}

/// Maps the `is-active` probe string.
pub fn parse_active_state(stdout: &str) -> ServiceState {
    match stdout.trim() {
        "active" => ServiceState::Active,
        "inactive" => ServiceState::Inactive,
        "failed" => ServiceState::Failed,
        _ => ServiceState::Unknown,
    }
}

/// Renders a systemctl invocation for a unit.
pub fn render_systemctl(verb: &str, unit: &str) -> String {
    format!("systemctl {} {}", verb, shell::quote(unit))
}

/// Absolute path of a unit file.
pub fn unit_path(unit: &str) -> String {
    format!("{UNIT_DIR}/{unit}")
}

/// Starts the unit.
pub async fn start(conn: &dyn Connection, unit: &str, timeout: Duration) -> Result<()> {
    exec_checked(conn, &render_systemctl("start", unit), timeout).await?;
    debug!(unit, "Started unit");
    Ok(())
}

/// Stops the unit.
pub async fn stop(conn: &dyn Connection, unit: &str, timeout: Duration) -> Result<()> {
    exec_checked(conn, &render_systemctl("stop", unit), timeout).await?;
    debug!(unit, "Stopped unit");
    Ok(())
}

/// Enables the unit at boot.
pub async fn enable(conn: &dyn Connection, unit: &str, timeout: Duration) -> Result<()> {
    exec_checked(conn, &render_systemctl("enable", unit), timeout).await?;
    Ok(())
}

/// Disables the unit at boot. Tolerates an already-removed unit.
pub async fn disable(conn: &dyn Connection, unit: &str, timeout: Duration) -> Result<()> {
    exec(conn, &render_systemctl("disable", unit), timeout).await?;
    Ok(())
}

/// Probes the unit's activity. `is-active` exits non-zero for every
/// state except `active`, so only transport failures are errors here.
pub async fn is_active(
    conn: &dyn Connection,
    unit: &str,
    timeout: Duration,
) -> Result<ServiceState> {
    let output = exec(conn, &render_systemctl("is-active", unit), timeout).await?;
    Ok(parse_active_state(&output.stdout))
}

/// Installs a rendered unit file and reloads the unit database.
pub async fn install_unit(
    conn: &dyn Connection,
    unit: &str,
    content: &str,
    timeout: Duration,
) -> Result<()> {
    let path = unit_path(unit);
    conn.upload_content(content.as_bytes(), &path, Some(0o644))
        .await
        .map_err(|e| into_crate_error(e, conn.identifier()))?;
    daemon_reload(conn, timeout).await?;
    debug!(unit, path = %path, "Installed unit file");
    Ok(())
}

/// Removes the unit file. Missing files are fine; the follow-up reload
/// is the caller's business.
pub async fn remove_unit(conn: &dyn Connection, unit: &str, timeout: Duration) -> Result<()> {
    let command = format!("rm -f {}", shell::quote(&unit_path(unit)));
    exec_checked(conn, &command, timeout).await?;
    Ok(())
}

/// Reloads the systemd unit database.
pub async fn daemon_reload(conn: &dyn Connection, timeout: Duration) -> Result<()> {
    exec_checked(conn, "systemctl daemon-reload", timeout).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_state_parsing() {
        assert_eq!(parse_active_state("active\n"), ServiceState::Active);
        assert_eq!(parse_active_state("inactive\n"), ServiceState::Inactive);
        assert_eq!(parse_active_state("failed"), ServiceState::Failed);
        assert_eq!(parse_active_state("activating"), ServiceState::Unknown);
        assert_eq!(parse_active_state(""), ServiceState::Unknown);
        assert!(ServiceState::Active.is_active());
        assert!(!ServiceState::Failed.is_active());
    }

    #[test]
    fn systemctl_rendering() {
        assert_eq!(
            render_systemctl("start", "mc-alpha-0a1b.service"),
            "systemctl start mc-alpha-0a1b.service"
        );
        // A hostile unit name cannot break out of the command line.
        assert_eq!(
            render_systemctl("stop", "evil; rm -rf /"),
            "systemctl stop 'evil; rm -rf /'"
        );
    }

    #[test]
    fn unit_paths_land_in_the_systemd_directory() {
        assert_eq!(
            unit_path("mc-alpha-0a1b.service"),
            "/etc/systemd/system/mc-alpha-0a1b.service"
        );
    }
}
