//! Error types for Craftops.
//!
//! This module defines the error taxonomy used throughout the crate. Every
//! variant a caller is expected to branch on carries enough structure to do
//! so without string matching.

use thiserror::Error;

use crate::model::ServerStatus;

/// Result type alias for Craftops operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Craftops.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Could not establish or reuse an SSH session (network, auth, or
    /// host-key problems all end up here).
    #[error("Failed to connect to '{host}': {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// A remote command exceeded its execution deadline. The underlying
    /// session stays pooled.
    #[error("Command on '{host}' timed out after {timeout_secs} seconds")]
    CommandTimeout {
        /// Target host
        host: String,
        /// Timeout in seconds
        timeout_secs: u64,
    },

    /// A remote command completed with a non-zero exit code.
    #[error("Command '{command}' failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        /// The command that was executed
        command: String,
        /// Remote exit code
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    // ========================================================================
    // Validation Errors
    // ========================================================================
    /// A user-supplied path tried to escape its server root.
    #[error("Path '{requested}' escapes the server directory")]
    PathTraversalRejected {
        /// The path as requested by the caller
        requested: String,
    },

    /// An account hit a plan limit.
    #[error("Quota exceeded: {message} (limit {limit})")]
    QuotaExceeded {
        /// Human-readable description of the limit hit
        message: String,
        /// The limiting value
        limit: usize,
    },

    /// A file failed upload or edit validation (extension, content
    /// signature, placement, or size).
    #[error("File '{name}' rejected: {reason}")]
    UnsupportedFile {
        /// The offending file name or path
        name: String,
        /// Which rule it broke
        reason: String,
    },

    /// No free port remained in the configured range.
    #[error("No free {kind} port left on host '{host}'")]
    PortsExhausted {
        /// Which range ran dry ("game" or "console")
        kind: &'static str,
        /// Host identifier
        host: String,
    },

    /// An operation was attempted against a record in the wrong state.
    #[error("Server is '{actual}', expected '{expected}'")]
    InvalidTransition {
        /// The state the operation required
        expected: ServerStatus,
        /// The state actually recorded
        actual: ServerStatus,
    },

    /// A host cannot be released while servers still reference it.
    #[error("Host '{host}' still has {servers} managed server(s)")]
    HostBusy {
        /// Host identifier
        host: String,
        /// Number of referencing servers
        servers: usize,
    },

    // ========================================================================
    // Provisioning Errors
    // ========================================================================
    /// Artifact resolution or the remote fetch failed.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    // ========================================================================
    // Vault Errors
    // ========================================================================
    /// A stored secret could not be decrypted (malformed token, wrong
    /// master secret, or corrupt ciphertext).
    #[error("Failed to decrypt secret: {0}")]
    DecryptionFailed(String),

    /// A plaintext could not be encrypted.
    #[error("Failed to encrypt secret: {0}")]
    EncryptionFailed(String),

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// The referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid or missing configuration. The only startup-fatal class.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========================================================================
    // Infrastructure Errors
    // ========================================================================
    /// Persistence seam reported a failure.
    #[error("State store error: {0}")]
    Store(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream manifest request failed.
    #[error("Manifest request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new connection failed error.
    pub fn connection_failed(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new command timeout error.
    pub fn command_timeout(host: impl Into<String>, timeout_secs: u64) -> Self {
        Self::CommandTimeout {
            host: host.into(),
            timeout_secs,
        }
    }

    /// Creates a new command failed error.
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Creates a new path traversal rejection.
    pub fn path_traversal(requested: impl Into<String>) -> Self {
        Self::PathTraversalRejected {
            requested: requested.into(),
        }
    }

    /// Creates a new file validation rejection.
    pub fn unsupported_file(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFile {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new quota exceeded error.
    pub fn quota_exceeded(message: impl Into<String>, limit: usize) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
            limit,
        }
    }

    /// Creates a new not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Returns true if this error is recoverable, i.e. the process should
    /// keep running and report the failure to the caller. Only
    /// configuration problems are fatal at startup.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Configuration(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
