//! Remote command façade.
//!
//! Turns operational intents into POSIX shell command lines and parses
//! their output into typed results. Every operation splits into a pure
//! renderer (args in, command string out), a pure parser (stdout in,
//! struct out), and a thin executor wrapper over a [`Connection`]. The
//! renderers and parsers carry the unit tests; nothing in here touches
//! persistence.
//!
//! Submodules:
//! - [`probe`] discovers host capacity (memory, cores, disk, OS label).
//! - [`listing`] lists directories with containment checks and a short
//!   TTL cache.
//! - [`files`] reads, writes, uploads, and downloads files under a
//!   server root with allow-list and content-signature validation.
//! - [`service`] drives systemd units.
//! - [`metrics`] samples per-process and host-wide resource usage.
//! - [`paths`] holds the containment and filename rules.
//! - [`shell`] quotes arguments for safe interpolation.

pub mod files;
pub mod listing;
pub mod metrics;
pub mod paths;
pub mod probe;
pub mod service;
pub mod shell;

pub use files::{download_to_temp, read_file, upload_file, write_file, UploadPolicy};
pub use listing::{DirEntry, EntryKind, ListingCache};
pub use metrics::{HostMetrics, ProcessMetrics};
pub use probe::probe_capacity;
pub use service::ServiceState;

use std::time::Duration;

use crate::connection::{into_crate_error, CommandOutput, Connection};
use crate::error::{Error, Result};

/// Runs a command, mapping transport failures into crate errors. The
/// exit code is left for the caller to interpret.
pub(crate) async fn exec(
    conn: &dyn Connection,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput> {
    conn.execute(command, timeout)
        .await
        .map_err(|e| into_crate_error(e, conn.identifier()))
}

/// Runs a command and requires a zero exit code.
pub(crate) async fn exec_checked(
    conn: &dyn Connection,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput> {
    let output = exec(conn, command, timeout).await?;
    if output.success {
        Ok(output)
    } else {
        Err(Error::command_failed(
            command,
            output.exit_code,
            output.stderr.trim().to_string(),
        ))
    }
}
