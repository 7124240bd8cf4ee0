//! # Craftops - Remote Minecraft Server Orchestration
//!
//! Craftops is an async, type-safe orchestration layer for provisioning and
//! operating Minecraft servers on remote Linux hosts over SSH. It turns a
//! plain VPS with `sshd`, `systemd`, `java`, and `curl` into managed game
//! server capacity without installing any agent on the host.
//!
//! ## Core Concepts
//!
//! - **Hosts**: Remote Linux machines registered with address and credentials
//! - **Servers**: Managed Minecraft instances, each a systemd unit on a host
//! - **Provisioner**: The orchestration facade that creates, starts, stops,
//!   and deletes servers and brokers console and file access
//! - **Reconciler**: A periodic sweep that re-aligns recorded state with what
//!   systemd on each host actually reports
//! - **Connection pool**: Multiplexed SSH sessions, one live connection per
//!   host shared across all operations targeting it
//! - **Vault**: Authenticated encryption for console credentials at rest
//! - **Store**: Pluggable persistence for host and server records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Embedding Application                         │
//! │                  (control-plane API, operator CLI)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                ┌───────────────────┴────────────────────┐
//!                ▼                                        ▼
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │         Provisioner          │        │          Reconciler          │
//! │  (create / start / stop /    │        │   (periodic systemd sweep,   │
//! │   delete, console, files)    │        │    drift detection)          │
//! └──────────────────────────────┘        └──────────────────────────────┘
//!                │                                        │
//!                └───────────────────┬────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Connection Pool                              │
//! │             (one multiplexed SSH session per host)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Remote Linux Hosts                              │
//! │            (systemd units, server directories, RCON)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use craftops::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Configuration comes from an optional file plus CRAFTOPS_* overrides
//!     let config = CoreConfig::load(None)?;
//!     let vault = SecretVault::new(std::env::var("CRAFTOPS_MASTER_SECRET")?);
//!
//!     let store = Arc::new(MemoryStore::new());
//!     let pool = Arc::new(ConnectionPool::new(PoolConfig::from(&config.ssh)));
//!
//!     let provisioner = Arc::new(Provisioner::new(
//!         config.clone(),
//!         store.clone(),
//!         store.clone(),
//!         pool.clone(),
//!         vault,
//!     )?);
//!
//!     // Background drift correction
//!     let reconciler = Arc::new(Reconciler::new(&config, store.clone(), store, pool));
//!     reconciler.spawn();
//!
//!     // Create a server; remote provisioning continues asynchronously
//!     let spec = ServerSpec {
//!         name: "Skyblock Weekend".into(),
//!         variant: ServerVariant::Paper,
//!         version: "1.21.1".into(),
//!         memory_mb: 4096,
//!         max_players: 20,
//!         ports: None,
//!     };
//!     let server = provisioner
//!         .create_server(account_id, PlanTier::Premium, host_id, spec)
//!         .await?;
//!
//!     println!("created {} as {}", server.name, server.internal_name);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.
    //!
    //! This prelude provides quick access to the most commonly needed types:
    //!
    //! - **Orchestration**: [`Provisioner`] and [`Reconciler`]
    //! - **Domain model**: Hosts, servers, specs, statuses, plan tiers
    //! - **Connections**: The SSH session pool and its traits
    //! - **Persistence**: Store traits and the in-memory implementation
    //! - **Errors**: Error handling types
    //!
    //! # Example
    //!
    //! ```rust,ignore
    //! use craftops::prelude::*;
    //!
    //! #[tokio::main]
    //! async fn main() -> Result<()> {
    //!     let config = CoreConfig::load(None)?;
    //!     let store = Arc::new(MemoryStore::new());
    //!     let pool = Arc::new(ConnectionPool::new(PoolConfig::from(&config.ssh)));
    //!     let vault = SecretVault::new(master_secret);
    //!
    //!     let provisioner =
    //!         Arc::new(Provisioner::new(config, store.clone(), store, pool, vault)?);
    //!     Ok(())
    //! }
    //! ```

    // Error handling
    pub use crate::error::{Error, Result};

    // Configuration
    pub use crate::config::{CoreConfig, PortsConfig, ProvisionConfig, ReconcileConfig, SshConfig};

    // Domain model
    pub use crate::model::{
        generate_internal_name, AccountId, AuthMethod, HostCapacity, HostCredentials, HostId,
        ManagedServer, PlanLimits, PlanTier, Reachability, RemoteHost, ServerId, ServerSpec,
        ServerStatus, ServerVariant,
    };

    // Secrets
    pub use crate::vault::SecretVault;

    // Port allocation
    pub use crate::ports::{PortAllocator, PortPair, PortRange};

    // Persistence
    pub use crate::store::{CredentialSource, MemoryStore, StateStore, StatusPatch};

    // Connection layer
    pub use crate::connection::{
        CommandOutput, Connection, ConnectionError, ConnectionPool, Connector, PoolConfig,
        PoolStats, SessionHandle, SshConnector,
    };

    // Remote host operations
    pub use crate::remote::{DirEntry, EntryKind, HostMetrics, ProcessMetrics, UploadPolicy};

    // Console access
    pub use crate::console::{ConsoleClient, PlayerList};

    // Provisioning
    pub use crate::provision::{
        ArtifactResolver, LaunchArtifact, Provisioner, ResolvedArtifact, ResolverConfig,
        UnitRenderer,
    };

    // Reconciliation
    pub use crate::reconcile::{Reconciler, SweepSummary};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for craftops operations.
///
/// This module provides the main [`Error`](error::Error) enum that covers all
/// failure modes the orchestration layer can surface, including connection
/// failures, command timeouts, quota violations, and rejected state
/// transitions, plus the [`is_recoverable`](error::Error::is_recoverable)
/// classification callers use to decide between retrying and reporting.
pub mod error;

/// Runtime configuration loaded from files and environment variables.
///
/// Every tunable of the orchestration layer lives here: SSH timeouts, the
/// provisioning layout on remote hosts, reconciliation cadence, and the
/// allocatable port ranges. `CRAFTOPS_*` environment variables override
/// file values.
pub mod config;

/// Structured logging setup built on the tracing ecosystem.
pub mod telemetry;

// ============================================================================
// Domain Model
// ============================================================================

/// Host and server records, statuses, and plan limits.
///
/// The data model everything else operates on: [`RemoteHost`](model::RemoteHost)
/// and [`ManagedServer`](model::ManagedServer) records, the status enums that
/// gate lifecycle transitions, and [`PlanTier`](model::PlanTier) quotas.
pub mod model;

/// Authenticated encryption for secrets at rest.
///
/// Console passwords never touch the store in plaintext. The
/// [`SecretVault`](vault::SecretVault) seals them with AES-256-CBC over an
/// Argon2-derived key and authenticates ciphertexts on the way back out.
pub mod vault;

/// Port pair allocation for game and console listeners.
pub mod ports;

/// Persistence traits and the in-memory reference store.
///
/// [`StateStore`](store::StateStore) is the seam an embedding application
/// implements over its own database; [`MemoryStore`](store::MemoryStore) backs
/// tests and single-process deployments. Status writes go through
/// [`StatusPatch`](store::StatusPatch) so concurrent updaters cannot clobber
/// unrelated fields.
pub mod store;

// ============================================================================
// Infrastructure
// ============================================================================

/// SSH connection layer with per-host session pooling.
///
/// This module provides the [`Connection`](connection::Connection) trait, the
/// russh-backed implementation, and a [`ConnectionPool`](connection::ConnectionPool)
/// that multiplexes every operation against a host over one live session.
/// Idle sessions are reaped after a configurable timeout and broken ones are
/// evicted on first failure.
pub mod connection;

/// Remote host operations executed over pooled sessions.
///
/// Command construction and output parsing for everything craftops does on a
/// host: systemd unit management, directory listings with a short-lived
/// cache, file transfer with upload policy enforcement, path containment,
/// capacity probing, and process metrics.
pub mod remote;

/// RCON console client for running commands inside live servers.
pub mod console;

// ============================================================================
// Orchestration
// ============================================================================

/// Server provisioning and lifecycle orchestration.
///
/// The [`Provisioner`](provision::Provisioner) is the facade the embedding
/// application calls. Creation resolves the requested distribution from its
/// upstream project, downloads it on the host, renders the systemd unit and
/// server configuration, and installs the service. Start, stop, and delete
/// drive the unit through systemd, with slow remote work running in
/// background tasks that commit their outcome to the store.
pub mod provision;

/// Periodic reconciliation of recorded state against systemd.
///
/// Crashed servers, manual `systemctl` interventions, and lost background
/// tasks all leave the store out of step with reality. The
/// [`Reconciler`](reconcile::Reconciler) sweeps every known server on an
/// interval and repairs the drift.
pub mod reconcile;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of craftops.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns detailed version information including build metadata.
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        rust_version: option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
        target: std::env::consts::ARCH,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Detailed version information for the craftops build.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Semantic version string
    pub version: &'static str,
    /// Minimum Rust version required
    pub rust_version: &'static str,
    /// Target triple for the build
    pub target: &'static str,
    /// Build profile (debug or release)
    pub profile: &'static str,
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "craftops {} ({}, {})",
            self.version, self.target, self.profile
        )
    }
}
