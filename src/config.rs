//! Configuration module for Craftops
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - A JSON configuration file (`--config` / `CRAFTOPS_CONFIG`)
//! - Environment variables
//!
//! The library never reads the environment on its own; the embedding
//! process builds a [`CoreConfig`] once and hands it down.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ports::{PortRange, DEFAULT_CONSOLE_RANGE, DEFAULT_GAME_RANGE};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoreConfig {
    /// Vault settings
    pub vault: VaultConfig,

    /// SSH and command execution settings
    pub ssh: SshConfig,

    /// Provisioning settings
    pub provision: ProvisionConfig,

    /// Status reconciliation settings
    pub reconcile: ReconcileConfig,

    /// Port allocation ranges
    pub ports: PortsConfig,
}

impl CoreConfig {
    /// Loads a configuration file (JSON) and applies environment
    /// overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Applies `CRAFTOPS_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var("CRAFTOPS_MASTER_SECRET") {
            self.vault.master_secret = secret;
        }

        if let Ok(secs) = std::env::var("CRAFTOPS_COMMAND_TIMEOUT") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.ssh.command_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(secs) = std::env::var("CRAFTOPS_IDLE_TIMEOUT") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.ssh.idle_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(secs) = std::env::var("CRAFTOPS_RECONCILE_INTERVAL") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.reconcile.interval = Duration::from_secs(secs);
            }
        }
    }

    /// Validates cross-field constraints. Port range problems surface
    /// here rather than at first allocation.
    pub fn validate(&self) -> Result<()> {
        crate::ports::PortAllocator::new(self.ports.game, self.ports.console)?;
        if self.ssh.command_timeout.is_zero() {
            return Err(Error::Configuration("command timeout must be non-zero".into()));
        }
        if self.provision.grace_period.is_zero() {
            return Err(Error::Configuration("grace period must be non-zero".into()));
        }
        Ok(())
    }
}

/// Vault settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VaultConfig {
    /// Master secret all stored credentials are encrypted under.
    /// Validated at startup by the vault self-check.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub master_secret: String,
}

/// SSH and command execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// TCP connect plus handshake deadline
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for ordinary remote commands
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Deadline for artifact downloads and installer runs
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,

    /// Deadline for the liveness echo probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Pooled session idle eviction window
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Directory under the connect user's home that holds all server
    /// roots
    pub base_dir: String,

    /// Wait between issuing a start/stop and re-probing the unit
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// Upload size cap in bytes
    pub upload_max_bytes: u64,

    /// Directory listing cache time-to-live
    #[serde(with = "humantime_serde")]
    pub listing_cache_ttl: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            base_dir: "minecraft".to_string(),
            grace_period: Duration::from_secs(8),
            upload_max_bytes: 256 * 1024 * 1024,
            listing_cache_ttl: Duration::from_secs(30),
        }
    }
}

impl ProvisionConfig {
    /// Absolute server root for an internal name under a connect user's
    /// home directory.
    pub fn server_root(&self, username: &str, internal_name: &str) -> String {
        format!("/home/{}/{}/{}", username, self.base_dir, internal_name)
    }
}

/// Status reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Sweep interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
        }
    }
}

/// Port allocation ranges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// Game port range
    pub game: PortRange,

    /// Admin console port range
    pub console: PortRange,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            game: DEFAULT_GAME_RANGE,
            console: DEFAULT_CONSOLE_RANGE,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ssh.command_timeout, Duration::from_secs(30));
        assert_eq!(config.reconcile.interval, Duration::from_secs(120));
    }

    #[test]
    fn server_root_layout() {
        let provision = ProvisionConfig::default();
        assert_eq!(
            provision.server_root("mcuser", "mc-survival-a1b2"),
            "/home/mcuser/minecraft/mc-survival-a1b2"
        );
    }

    #[test]
    fn json_round_trip_with_durations() {
        let config = CoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ssh.idle_timeout, config.ssh.idle_timeout);
        assert_eq!(back.ports.game, config.ports.game);
    }

    #[test]
    fn bad_port_config_rejected() {
        let mut config = CoreConfig::default();
        config.ports.console = config.ports.game;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("CRAFTOPS_RECONCILE_INTERVAL", "15");
        let mut config = CoreConfig::default();
        config.apply_env();
        std::env::remove_var("CRAFTOPS_RECONCILE_INTERVAL");
        assert_eq!(config.reconcile.interval, Duration::from_secs(15));
    }
}
