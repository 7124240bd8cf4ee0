//! Variant-specific provisioning behavior.
//!
//! All variants end up as a systemd-supervised java process; they differ
//! in how the server binary is obtained and what provisioning leaves
//! behind to launch. Vanilla resolves through the upstream launcher
//! manifest, Paper through its builds API, Purpur and Fabric through
//! direct download URLs, and Forge ships an installer that is run on the
//! host and leaves a wrapper script.

use serde::{Deserialize, Serialize};

use crate::model::ServerVariant;

/// Filename the launchable server jar is stored under.
pub const SERVER_JAR: &str = "server.jar";
/// Filename an installer download is stored under before being run.
pub const INSTALLER_JAR: &str = "installer.jar";
/// Wrapper script an installer-based setup leaves behind.
pub const RUN_SCRIPT: &str = "run.sh";

/// What acquisition left in the server root and how to launch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchArtifact {
    /// A single launchable jar, started with explicit heap flags
    Jar {
        /// Jar filename relative to the server root
        file: String,
    },
    /// An installer-generated wrapper script
    Script {
        /// Script filename relative to the server root
        file: String,
    },
}

impl LaunchArtifact {
    /// A launchable jar under the server root.
    pub fn jar(file: impl Into<String>) -> Self {
        Self::Jar { file: file.into() }
    }

    /// A wrapper script under the server root.
    pub fn script(file: impl Into<String>) -> Self {
        Self::Script { file: file.into() }
    }
}

impl ServerVariant {
    /// True for variants whose distribution is an installer that must be
    /// run on the host rather than a launchable jar.
    pub fn uses_installer(self) -> bool {
        matches!(self, ServerVariant::Forge)
    }

    /// The filename the downloaded artifact is stored under.
    pub fn download_target(self) -> &'static str {
        if self.uses_installer() {
            INSTALLER_JAR
        } else {
            SERVER_JAR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forge_uses_an_installer() {
        assert!(ServerVariant::Forge.uses_installer());
        for variant in [
            ServerVariant::Vanilla,
            ServerVariant::Paper,
            ServerVariant::Purpur,
            ServerVariant::Fabric,
        ] {
            assert!(!variant.uses_installer(), "{variant:?}");
        }
    }

    #[test]
    fn download_targets() {
        assert_eq!(ServerVariant::Paper.download_target(), "server.jar");
        assert_eq!(ServerVariant::Forge.download_target(), "installer.jar");
    }
}
