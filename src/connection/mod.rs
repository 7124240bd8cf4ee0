//! Connection layer for remote host communication.
//!
//! This module provides the transport interface the rest of the crate
//! executes through. Everything above it speaks [`Connection`]; only the
//! SSH implementation in [`ssh`] and the tests' scripted fakes know how
//! bytes actually move.
//!
//! # Overview
//!
//! - [`Connection`]: one authenticated session to one host. Commands run
//!   on fresh exec channels; files move over SFTP on the same session.
//! - [`Connector`]: opens sessions from [`HostCredentials`]. The pool
//!   takes it as a seam so tests can swap in fakes.
//! - [`ConnectionPool`](pool::ConnectionPool): at most one live session
//!   per host id, per-host serialized establishment, idle eviction.
//!
//! Remote paths are plain `&str`: they name POSIX paths on the target and
//! never touch the local filesystem's notion of a path.

/// Pure Rust SSH implementation using russh.
pub mod ssh;

/// Session pooling keyed by host id.
pub mod pool;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::HostCredentials;

pub use pool::{ConnectionPool, PoolConfig, PoolStats, SessionHandle};
pub use ssh::{SshConnector, SshSession};

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the initial connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication was rejected by the remote host.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The presented host key did not match the pinned fingerprint.
    #[error("Host key mismatch: expected {expected}, got {actual}")]
    HostKeyMismatch {
        /// Pinned fingerprint
        expected: String,
        /// Fingerprint presented by the host
        actual: String,
    },

    /// Command execution failed (not a non-zero exit code; the channel
    /// itself broke).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload or download operation failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// An operation exceeded its deadline.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Connection was closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<russh::Error> for ConnectionError {
    fn from(err: russh::Error) -> Self {
        ConnectionError::ConnectionFailed(format!("ssh error: {err}"))
    }
}

impl From<russh_sftp::client::error::Error> for ConnectionError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        ConnectionError::TransferFailed(format!("sftp error: {err}"))
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// The result of executing a remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandOutput {
    /// Create a new successful command result.
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result.
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// One authenticated session to one remote host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Connection identifier for log lines, `user@host:port`.
    fn identifier(&self) -> &str;

    /// Cheap local check that the session has not been torn down.
    async fn is_alive(&self) -> bool;

    /// Execute a command on the remote host. The deadline covers the
    /// whole channel round trip; on timeout the channel is abandoned and
    /// the session stays usable.
    async fn execute(&self, command: &str, timeout: Duration) -> ConnectionResult<CommandOutput>;

    /// Upload a local file to the remote host.
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()>;

    /// Upload in-memory content to a remote file.
    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()>;

    /// Download a remote file to a local path.
    async fn download(&self, remote_path: &str, local_path: &Path) -> ConnectionResult<()>;

    /// Download a remote file into memory.
    async fn download_content(&self, remote_path: &str) -> ConnectionResult<Vec<u8>>;

    /// Close the session. Idempotent.
    async fn close(&self) -> ConnectionResult<()>;
}

/// Opens sessions from credentials. The pool's only way to connect.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish and authenticate a session.
    async fn connect(
        &self,
        credentials: &HostCredentials,
    ) -> ConnectionResult<std::sync::Arc<dyn Connection>>;
}

/// Maps transport errors into the crate taxonomy. Timeouts keep their
/// identity; everything else that prevented the command from being
/// attempted collapses into `ConnectionFailed`.
pub(crate) fn into_crate_error(err: ConnectionError, host: &str) -> crate::error::Error {
    match err {
        ConnectionError::Timeout(secs) => crate::error::Error::command_timeout(host, secs),
        other => crate::error::Error::connection_failed(host, other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
