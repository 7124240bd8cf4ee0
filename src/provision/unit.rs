//! Rendering of the files a provisioned server needs on disk.
//!
//! The systemd unit, `server.properties` and the JVM argument file are
//! minijinja templates rendered against typed contexts. The EULA marker
//! is a constant.

use minijinja::Environment;
use serde::Serialize;

use crate::error::Result;
use crate::model::ManagedServer;
use crate::provision::variant::LaunchArtifact;

/// Written as `eula.txt`. Operating a server implies the owner accepted
/// the upstream EULA during creation.
pub const EULA_ACCEPTED: &str = "eula=true\n";

const UNIT_TEMPLATE: &str = "\
[Unit]
Description=Minecraft server {{ internal_name }} ({{ display_name }})
After=network.target

[Service]
Type=simple
User={{ user }}
WorkingDirectory={{ working_dir }}
ExecStart={{ exec_start }}
Restart=on-failure
RestartSec=10

[Install]
WantedBy=multi-user.target
";

const PROPERTIES_TEMPLATE: &str = "\
# Managed by craftops. Edits survive restarts but not re-provisioning.
server-port={{ game_port }}
max-players={{ max_players }}
motd={{ motd }}
enable-rcon=true
rcon.port={{ console_port }}
rcon.password={{ console_password }}
broadcast-rcon-to-ops=false
";

const JVM_ARGS_TEMPLATE: &str = "-Xms{{ memory_mb }}M -Xmx{{ memory_mb }}M\n";

#[derive(Debug, Serialize)]
struct UnitContext {
    internal_name: String,
    display_name: String,
    user: String,
    working_dir: String,
    exec_start: String,
}

#[derive(Debug, Serialize)]
struct PropertiesContext {
    game_port: u16,
    max_players: u32,
    motd: String,
    console_port: u16,
    console_password: String,
}

#[derive(Debug, Serialize)]
struct JvmArgsContext {
    memory_mb: u32,
}

/// Renders provisioning files from built-in templates.
#[derive(Debug)]
pub struct UnitRenderer {
    env: Environment<'static>,
}

impl UnitRenderer {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    /// Renders the systemd unit for a server and its launch artifact.
    pub fn render_unit(
        &self,
        server: &ManagedServer,
        artifact: &LaunchArtifact,
        user: &str,
        server_root: &str,
    ) -> Result<String> {
        let exec_start = match artifact {
            LaunchArtifact::Jar { file } => format!(
                "/usr/bin/java -Xms{0}M -Xmx{0}M -jar {file} nogui",
                server.memory_mb
            ),
            LaunchArtifact::Script { file } => format!("/bin/sh {file}"),
        };
        let ctx = UnitContext {
            internal_name: server.internal_name.clone(),
            display_name: property_safe(&server.name),
            user: user.to_string(),
            working_dir: server_root.to_string(),
            exec_start,
        };
        self.render(UNIT_TEMPLATE, &ctx)
    }

    /// Renders `server.properties`. The console secret goes in as
    /// plaintext; the game process reads it from disk.
    pub fn render_properties(
        &self,
        server: &ManagedServer,
        console_password: &str,
    ) -> Result<String> {
        let ctx = PropertiesContext {
            game_port: server.game_port,
            max_players: server.max_players,
            motd: property_safe(&server.name),
            console_port: server.console_port,
            console_password: console_password.to_string(),
        };
        self.render(PROPERTIES_TEMPLATE, &ctx)
    }

    /// Renders `user_jvm_args.txt` for wrapper-script launches. The
    /// wrapper reads memory flags from this file instead of taking them
    /// on its command line.
    pub fn render_jvm_args(&self, server: &ManagedServer) -> Result<String> {
        let ctx = JvmArgsContext {
            memory_mb: server.memory_mb,
        };
        self.render(JVM_ARGS_TEMPLATE, &ctx)
    }

    fn render<C: Serialize>(&self, template: &str, ctx: &C) -> Result<String> {
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(ctx)?)
    }
}

impl Default for UnitRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Unit files and java properties files are line oriented; a newline in
/// an interpolated value would smuggle in extra directives.
fn property_safe(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountId, HostId, ServerId, ServerStatus, ServerVariant};
    use crate::provision::variant::{RUN_SCRIPT, SERVER_JAR};
    use chrono::Utc;

    fn server(variant: ServerVariant) -> ManagedServer {
        ManagedServer {
            id: ServerId::new(),
            account_id: AccountId::new(),
            host_id: HostId::new(),
            internal_name: "mc-survival-a1b2".to_string(),
            name: "Survival".to_string(),
            variant,
            version: "1.21.1".to_string(),
            memory_mb: 2048,
            max_players: 20,
            game_port: 25565,
            console_port: 26565,
            console_secret: "encrypted".to_string(),
            status: ServerStatus::Stopped,
            last_error: None,
            online_players: None,
            last_started_at: None,
            last_stopped_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn jar_unit_launches_java_directly() {
        let renderer = UnitRenderer::new();
        let unit = renderer
            .render_unit(
                &server(ServerVariant::Paper),
                &LaunchArtifact::jar(SERVER_JAR),
                "mcuser",
                "/home/mcuser/minecraft/mc-survival-a1b2",
            )
            .unwrap();

        assert!(unit.contains(
            "ExecStart=/usr/bin/java -Xms2048M -Xmx2048M -jar server.jar nogui"
        ));
        assert!(unit.contains("WorkingDirectory=/home/mcuser/minecraft/mc-survival-a1b2"));
        assert!(unit.contains("User=mcuser"));
        assert!(unit.contains("Restart=on-failure"));
        assert!(unit.contains("RestartSec=10"));
        assert!(unit.contains("Description=Minecraft server mc-survival-a1b2 (Survival)"));
    }

    #[test]
    fn script_unit_launches_through_sh() {
        let renderer = UnitRenderer::new();
        let unit = renderer
            .render_unit(
                &server(ServerVariant::Forge),
                &LaunchArtifact::script(RUN_SCRIPT),
                "mcuser",
                "/home/mcuser/minecraft/mc-survival-a1b2",
            )
            .unwrap();

        assert!(unit.contains("ExecStart=/bin/sh run.sh"));
        assert!(!unit.contains("-Xmx"));
    }

    #[test]
    fn properties_wire_up_the_console() {
        let renderer = UnitRenderer::new();
        let rendered = renderer
            .render_properties(&server(ServerVariant::Vanilla), "4f9a0c11d2e38b7a")
            .unwrap();

        assert!(rendered.contains("server-port=25565"));
        assert!(rendered.contains("max-players=20"));
        assert!(rendered.contains("enable-rcon=true"));
        assert!(rendered.contains("rcon.port=26565"));
        assert!(rendered.contains("rcon.password=4f9a0c11d2e38b7a"));
        assert!(rendered.contains("motd=Survival"));
    }

    #[test]
    fn control_characters_cannot_inject_directives() {
        let renderer = UnitRenderer::new();
        let mut hostile = server(ServerVariant::Vanilla);
        hostile.name = "evil\nExecStartPre=/bin/rm -rf /".to_string();

        let unit = renderer
            .render_unit(
                &hostile,
                &LaunchArtifact::jar(SERVER_JAR),
                "mcuser",
                "/srv/root",
            )
            .unwrap();
        // Directives only count at line start; the run-together text is
        // inert inside the description.
        assert!(!unit.contains("\nExecStartPre"));

        let properties = renderer.render_properties(&hostile, "pw").unwrap();
        assert!(!properties.contains("\nExecStartPre"));
    }

    #[test]
    fn jvm_args_carry_both_bounds() {
        let renderer = UnitRenderer::new();
        let args = renderer.render_jvm_args(&server(ServerVariant::Forge)).unwrap();
        assert_eq!(args, "-Xms2048M -Xmx2048M\n");
    }
}
