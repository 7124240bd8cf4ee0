//! Provisioning and orchestration workflows.
//!
//! [`Provisioner`] is the entry point the embedding layer calls: it owns
//! the connection pool, the vault, the artifact resolver and the port
//! allocator, and drives every server lifecycle operation end to end.
//! Long-running remote work happens in spawned tasks; their outcome is
//! always committed back to the store, either as the target status or as
//! `Error` with the failure message persisted.
//!
//! The split between the synchronous and asynchronous halves follows the
//! user-facing contract: `create`, `start` and `stop` return as soon as
//! the record reflects the intent; convergence is observable through the
//! record's status field.

pub mod acquire;
pub mod unit;
pub mod variant;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::CoreConfig;
use crate::connection::{into_crate_error, Connection, ConnectionPool, SessionHandle};
use crate::console::{ConsoleClient, PlayerList};
use crate::error::{Error, Result};
use crate::model::{
    AccountId, HostId, ManagedServer, PlanTier, Reachability, RemoteHost, ServerId, ServerSpec,
    ServerStatus,
};
use crate::remote::{self, shell, DirEntry, HostMetrics, ProcessMetrics, UploadPolicy};
use crate::store::{CredentialSource, StateStore, StatusPatch};
use crate::vault::SecretVault;

pub use acquire::{ArtifactResolver, ResolvedArtifact, ResolverConfig};
pub use unit::UnitRenderer;
pub use variant::LaunchArtifact;

use variant::{INSTALLER_JAR, RUN_SCRIPT, SERVER_JAR};

/// Orchestrates hosts and managed servers over pooled SSH sessions.
pub struct Provisioner {
    config: CoreConfig,
    store: Arc<dyn StateStore>,
    credentials: Arc<dyn CredentialSource>,
    pool: Arc<ConnectionPool>,
    vault: SecretVault,
    resolver: ArtifactResolver,
    allocator: crate::ports::PortAllocator,
    renderer: UnitRenderer,
    listings: remote::ListingCache,
}

impl Provisioner {
    /// Creates a provisioner against the real upstream metadata services.
    pub fn new(
        config: CoreConfig,
        store: Arc<dyn StateStore>,
        credentials: Arc<dyn CredentialSource>,
        pool: Arc<ConnectionPool>,
        vault: SecretVault,
    ) -> Result<Self> {
        let resolver = ArtifactResolver::new()?;
        Self::with_resolver(config, store, credentials, pool, vault, resolver)
    }

    /// Creates a provisioner with a custom artifact resolver. Tests point
    /// the resolver at a mock metadata server.
    pub fn with_resolver(
        config: CoreConfig,
        store: Arc<dyn StateStore>,
        credentials: Arc<dyn CredentialSource>,
        pool: Arc<ConnectionPool>,
        vault: SecretVault,
        resolver: ArtifactResolver,
    ) -> Result<Self> {
        let allocator = crate::ports::PortAllocator::new(config.ports.game, config.ports.console)?;
        let listings = remote::ListingCache::new(config.provision.listing_cache_ttl);
        Ok(Self {
            config,
            store,
            credentials,
            pool,
            vault,
            resolver,
            allocator,
            renderer: UnitRenderer::new(),
            listings,
        })
    }

    /// The store this provisioner commits to.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// The pool this provisioner executes through.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    async fn session_for(&self, host_id: HostId) -> Result<SessionHandle> {
        let credentials = self.credentials.credentials(host_id).await?;
        self.pool.acquire(host_id, &credentials).await
    }

    async fn server_context(&self, id: ServerId) -> Result<(ManagedServer, RemoteHost, String)> {
        let server = self.store.server(id).await?;
        let host = self.store.host(server.host_id).await?;
        let root = self
            .config
            .provision
            .server_root(&host.username, &server.internal_name);
        Ok((server, host, root))
    }

    fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy::new(self.config.provision.upload_max_bytes)
    }

    // ========================================================================
    // Host lifecycle
    // ========================================================================

    /// Probes a host's capacity and records the outcome on the host
    /// record. Failures mark the host `error` before propagating.
    pub async fn probe_host(&self, id: HostId) -> Result<RemoteHost> {
        let mut host = self.store.host(id).await?;
        let outcome = async {
            let session = self.session_for(id).await?;
            remote::probe_capacity(&*session, self.config.ssh.command_timeout).await
        }
        .await;

        host.last_checked_at = Some(Utc::now());
        match outcome {
            Ok(capacity) => {
                info!(
                    host = %id,
                    memory_mb = capacity.total_memory_mb,
                    cores = capacity.cpu_cores,
                    os = %capacity.os_name,
                    "Host probe succeeded"
                );
                host.reachability = Reachability::Connected;
                host.last_error = None;
                host.capacity = Some(capacity);
                self.store.update_host(host.clone()).await?;
                Ok(host)
            }
            Err(e) => {
                warn!(host = %id, error = %e, "Host probe failed");
                host.reachability = Reachability::Error;
                host.last_error = Some(e.to_string());
                self.store.update_host(host).await?;
                Err(e)
            }
        }
    }

    /// Removes a host from rotation: rejected while servers still
    /// reference it, otherwise closes the pooled session and drops the
    /// record. Safe to call twice.
    pub async fn release_host(&self, id: HostId) -> Result<()> {
        let referencing = self.store.servers_on_host(id).await?;
        if !referencing.is_empty() {
            let label = match self.store.host(id).await {
                Ok(host) => host.addr,
                Err(_) => id.to_string(),
            };
            return Err(Error::HostBusy {
                host: label,
                servers: referencing.len(),
            });
        }

        let _ = self.pool.close(id).await;
        self.listings.invalidate_host(id);
        match self.store.remove_host(id).await {
            Ok(()) => {
                info!(host = %id, "Host released");
                Ok(())
            }
            Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Server creation
    // ========================================================================

    /// Creates a server record and kicks off remote provisioning.
    ///
    /// Returns the freshly inserted `Stopped` record as soon as the
    /// preconditions pass; the remote sequence runs in a spawned task and
    /// flips the record to `Error` with a persisted message if any step
    /// fails.
    pub async fn create_server(
        self: &Arc<Self>,
        account: AccountId,
        tier: PlanTier,
        host_id: HostId,
        spec: ServerSpec,
    ) -> Result<ManagedServer> {
        let host = self.store.host(host_id).await?;

        // Reachability gate: a host that cannot answer an echo cannot be
        // provisioned onto.
        let session = self.session_for(host_id).await?;
        remote::exec_checked(&*session, "echo ok", self.config.ssh.probe_timeout).await?;

        let owned = self.store.servers_for_account(account).await?;
        if let Some(limit) = tier.limits().max_servers {
            if owned.len() >= limit {
                return Err(Error::quota_exceeded("account server limit reached", limit));
            }
        }

        let on_host = self.store.servers_on_host(host_id).await?;
        let used_game: HashSet<u16> = on_host.iter().map(|s| s.game_port).collect();
        let used_console: HashSet<u16> = on_host.iter().map(|s| s.console_port).collect();
        let ports = match spec.ports {
            Some(pair) => self
                .allocator
                .validate_explicit(pair, &used_game, &used_console)?,
            None => self.allocator.allocate(&host.addr, &used_game, &used_console)?,
        };

        let console_secret = SecretVault::generate_console_secret();
        let server = ManagedServer {
            id: ServerId::new(),
            account_id: account,
            host_id,
            internal_name: crate::model::generate_internal_name(&spec.name),
            name: spec.name,
            variant: spec.variant,
            version: spec.version,
            memory_mb: spec.memory_mb,
            max_players: spec.max_players,
            game_port: ports.game,
            console_port: ports.console,
            console_secret: self.vault.encrypt(&console_secret)?,
            status: ServerStatus::Stopped,
            last_error: None,
            online_players: None,
            last_started_at: None,
            last_stopped_at: None,
            created_at: Utc::now(),
        };
        self.store.insert_server(server.clone()).await?;
        info!(
            server = %server.id,
            host = %host_id,
            name = %server.internal_name,
            variant = %server.variant,
            version = %server.version,
            "Server record created, provisioning in background"
        );

        let this = Arc::clone(self);
        let record = server.clone();
        tokio::spawn(async move {
            if let Err(e) = this.provision_remote(&record, &host, &console_secret).await {
                error!(server = %record.id, error = %e, "Provisioning failed");
                let patch = StatusPatch::failed(e.to_string());
                if let Err(e) = this
                    .store
                    .set_status(record.id, ServerStatus::Error, patch)
                    .await
                {
                    error!(server = %record.id, error = %e, "Could not persist provisioning failure");
                }
            }
        });

        Ok(server)
    }

    /// The strictly sequential remote side of server creation.
    async fn provision_remote(
        &self,
        server: &ManagedServer,
        host: &RemoteHost,
        console_secret: &str,
    ) -> Result<()> {
        let session = self.session_for(server.host_id).await?;
        let conn: &dyn Connection = &*session;
        let timeouts = &self.config.ssh;
        let root = self
            .config
            .provision
            .server_root(&host.username, &server.internal_name);

        remote::exec_checked(
            conn,
            &format!("mkdir -p {}", shell::quote(&root)),
            timeouts.command_timeout,
        )
        .await?;

        let resolved = self.resolver.resolve(server.variant, &server.version).await?;
        let target = format!("{root}/{}", server.variant.download_target());
        self.fetch_artifact(conn, &resolved, &target).await?;

        let artifact = if resolved.installer {
            self.run_installer(conn, &root).await?
        } else {
            LaunchArtifact::jar(SERVER_JAR)
        };

        remote::exec_checked(
            conn,
            &format!("chmod 755 {}", shell::quote(&target)),
            timeouts.command_timeout,
        )
        .await?;
        remote::exec_checked(
            conn,
            &format!(
                "chown -R {}: {}",
                shell::quote(&host.username),
                shell::quote(&root)
            ),
            timeouts.command_timeout,
        )
        .await?;

        self.put_file(conn, unit::EULA_ACCEPTED.as_bytes(), &format!("{root}/eula.txt"))
            .await?;

        let properties = self.renderer.render_properties(server, console_secret)?;
        self.put_file(
            conn,
            properties.as_bytes(),
            &format!("{root}/server.properties"),
        )
        .await?;

        if matches!(artifact, LaunchArtifact::Script { .. }) {
            let args = self.renderer.render_jvm_args(server)?;
            self.put_file(conn, args.as_bytes(), &format!("{root}/user_jvm_args.txt"))
                .await?;
        }

        let rendered = self
            .renderer
            .render_unit(server, &artifact, &host.username, &root)?;
        remote::service::install_unit(conn, &server.unit_name(), &rendered, timeouts.command_timeout)
            .await?;

        info!(server = %server.id, name = %server.internal_name, "Provisioning complete");
        Ok(())
    }

    /// Downloads the resolved artifact on the remote host and verifies it
    /// is non-empty. An empty file means the upstream served an error
    /// page or the transfer was cut short.
    async fn fetch_artifact(
        &self,
        conn: &dyn Connection,
        resolved: &ResolvedArtifact,
        target: &str,
    ) -> Result<()> {
        let download = format!(
            "curl -fsSL -o {} {}",
            shell::quote(target),
            shell::quote(&resolved.url)
        );
        remote::exec_checked(conn, &download, self.config.ssh.download_timeout).await?;

        let size = remote::files::remote_size(conn, target, self.config.ssh.command_timeout).await?;
        if size == 0 {
            return Err(Error::DownloadFailed(format!(
                "downloaded artifact {target} is empty"
            )));
        }
        debug!(path = %target, bytes = size, "Artifact downloaded");
        Ok(())
    }

    /// Runs the installer in the server root and verifies it produced the
    /// wrapper launch script.
    async fn run_installer(&self, conn: &dyn Connection, root: &str) -> Result<LaunchArtifact> {
        let install = format!(
            "cd {} && java -jar {INSTALLER_JAR} --installServer",
            shell::quote(root)
        );
        remote::exec_checked(conn, &install, self.config.ssh.download_timeout).await?;

        let check = format!("test -f {}", shell::quote(&format!("{root}/{RUN_SCRIPT}")));
        let output = remote::exec(conn, &check, self.config.ssh.command_timeout).await?;
        if !output.success {
            return Err(Error::DownloadFailed(
                "installer finished without a run.sh launch script".to_string(),
            ));
        }
        Ok(LaunchArtifact::script(RUN_SCRIPT))
    }

    async fn put_file(&self, conn: &dyn Connection, content: &[u8], path: &str) -> Result<()> {
        conn.upload_content(content, path, Some(0o644))
            .await
            .map_err(|e| into_crate_error(e, conn.identifier()))
    }

    // ========================================================================
    // Start / stop
    // ========================================================================

    /// Flips a `Stopped` server to `Starting` and converges in the
    /// background. The running-server quota is enforced at the moment of
    /// intent, before the flip.
    pub async fn start_server(
        self: &Arc<Self>,
        id: ServerId,
        tier: PlanTier,
    ) -> Result<ManagedServer> {
        let server = self.store.server(id).await?;

        let limit = tier.limits().max_running;
        let active = self
            .store
            .servers_for_account(server.account_id)
            .await?
            .iter()
            .filter(|s| matches!(s.status, ServerStatus::Running | ServerStatus::Starting))
            .count();
        if active >= limit {
            return Err(Error::quota_exceeded("plan running-server limit reached", limit));
        }

        let flipped = self
            .store
            .compare_and_set_status(
                id,
                ServerStatus::Stopped,
                ServerStatus::Starting,
                StatusPatch::none(),
            )
            .await?;
        info!(server = %id, "Start accepted");

        let this = Arc::clone(self);
        let record = flipped.clone();
        tokio::spawn(async move {
            this.converge(record, Transition::Start).await;
        });
        Ok(flipped)
    }

    /// Flips a `Running` server to `Stopping` and converges in the
    /// background.
    pub async fn stop_server(self: &Arc<Self>, id: ServerId) -> Result<ManagedServer> {
        let flipped = self
            .store
            .compare_and_set_status(
                id,
                ServerStatus::Running,
                ServerStatus::Stopping,
                StatusPatch::none(),
            )
            .await?;
        info!(server = %id, "Stop accepted");

        let this = Arc::clone(self);
        let record = flipped.clone();
        tokio::spawn(async move {
            this.converge(record, Transition::Stop).await;
        });
        Ok(flipped)
    }

    /// Issues the supervisor verb, waits out the grace period, re-probes
    /// the unit and commits the outcome. Never returns an error: every
    /// path ends in a status write, failed writes are logged.
    async fn converge(&self, server: ManagedServer, transition: Transition) {
        let unit = server.unit_name();
        let outcome: Result<bool> = async {
            let session = self.session_for(server.host_id).await?;
            let conn: &dyn Connection = &*session;
            let timeouts = &self.config.ssh;

            match transition {
                Transition::Start => {
                    remote::service::start(conn, &unit, timeouts.command_timeout).await?
                }
                Transition::Stop => {
                    remote::service::stop(conn, &unit, timeouts.command_timeout).await?
                }
            }

            tokio::time::sleep(self.config.provision.grace_period).await;
            let state = remote::service::is_active(conn, &unit, timeouts.probe_timeout).await?;
            Ok(state.is_active())
        }
        .await;

        let (status, patch) = match (transition, outcome) {
            (Transition::Start, Ok(true)) => (ServerStatus::Running, StatusPatch::started()),
            (Transition::Stop, Ok(false)) => (ServerStatus::Stopped, StatusPatch::stopped()),
            (Transition::Start, Ok(false)) => (
                ServerStatus::Error,
                StatusPatch::failed("unit did not become active after start"),
            ),
            (Transition::Stop, Ok(true)) => (
                ServerStatus::Error,
                StatusPatch::failed("unit still active after stop"),
            ),
            (_, Err(e)) => {
                warn!(server = %server.id, unit = %unit, error = %e, "Transition failed");
                (ServerStatus::Error, StatusPatch::failed(e.to_string()))
            }
        };

        debug!(server = %server.id, status = %status, "Committing transition outcome");
        if let Err(e) = self.store.set_status(server.id, status, patch).await {
            error!(server = %server.id, error = %e, "Could not persist transition outcome");
        }
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Removes a server that is not running. The record (and with it the
    /// port reservations) disappears immediately; remote cleanup runs
    /// best-effort in the background with every step's outcome logged.
    ///
    /// A recreate racing the in-flight cleanup can observe the old
    /// directory for a moment; fresh internal names keep the two from
    /// colliding.
    pub async fn delete_server(self: &Arc<Self>, id: ServerId) -> Result<()> {
        let server = self.store.server(id).await?;
        if matches!(
            server.status,
            ServerStatus::Running | ServerStatus::Starting | ServerStatus::Stopping
        ) {
            return Err(Error::InvalidTransition {
                expected: ServerStatus::Stopped,
                actual: server.status,
            });
        }

        let host = self.store.host(server.host_id).await?;
        self.store.remove_server(id).await?;
        info!(server = %id, name = %server.internal_name, "Server deleted, cleaning up remote state");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.cleanup_remote(server, host).await;
        });
        Ok(())
    }

    /// Best-effort removal of everything provisioning put on the host.
    /// Steps are independent; one failing does not stop the rest.
    async fn cleanup_remote(&self, server: ManagedServer, host: RemoteHost) {
        let session = match self.session_for(server.host_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(server = %server.id, error = %e, "Cleanup skipped, host unreachable");
                return;
            }
        };
        let conn: &dyn Connection = &*session;
        let timeout = self.config.ssh.command_timeout;
        let unit = server.unit_name();

        // A server deleted out of `error` may still have an active unit.
        if let Err(e) = remote::service::stop(conn, &unit, timeout).await {
            debug!(unit = %unit, error = %e, "Cleanup stop failed");
        }
        if let Err(e) = remote::service::disable(conn, &unit, timeout).await {
            debug!(unit = %unit, error = %e, "Cleanup disable failed");
        }
        if let Err(e) = remote::service::remove_unit(conn, &unit, timeout).await {
            warn!(unit = %unit, error = %e, "Could not remove unit file");
        }
        if let Err(e) = remote::service::daemon_reload(conn, timeout).await {
            warn!(host = %server.host_id, error = %e, "Could not reload the unit database");
        }

        match removal_root(&self.config.provision.base_dir, &host.username, &server.internal_name)
        {
            Some(root) => {
                let command = format!("rm -rf {}", shell::quote(&root));
                if let Err(e) = remote::exec_checked(conn, &command, timeout).await {
                    warn!(path = %root, error = %e, "Could not remove server directory");
                }
            }
            None => {
                warn!(
                    server = %server.id,
                    name = %server.internal_name,
                    "Refusing to remove a suspicious server directory path"
                );
            }
        }

        self.listings.invalidate_host(server.host_id);
        info!(server = %server.id, "Remote cleanup finished");
    }

    // ========================================================================
    // Console access
    // ========================================================================

    /// Sends a text command to a running server's admin console.
    pub async fn console_command(&self, id: ServerId, command: &str) -> Result<String> {
        let (server, host) = self.running_server(id).await?;
        let mut client = self.console_client(&server, &host).await?;
        client.command(command).await
    }

    /// Queries the player list and records the live player count.
    pub async fn player_list(&self, id: ServerId) -> Result<PlayerList> {
        let (server, host) = self.running_server(id).await?;
        let mut client = self.console_client(&server, &host).await?;
        let list = client.list_players().await?;

        // Last write wins; the next reconciliation corrects any race.
        if let Ok(mut fresh) = self.store.server(id).await {
            fresh.online_players = Some(list.online);
            if let Err(e) = self.store.update_server(fresh).await {
                debug!(server = %id, error = %e, "Could not record player count");
            }
        }
        Ok(list)
    }

    async fn running_server(&self, id: ServerId) -> Result<(ManagedServer, RemoteHost)> {
        let server = self.store.server(id).await?;
        if server.status != ServerStatus::Running {
            return Err(Error::InvalidTransition {
                expected: ServerStatus::Running,
                actual: server.status,
            });
        }
        let host = self.store.host(server.host_id).await?;
        Ok((server, host))
    }

    async fn console_client(
        &self,
        server: &ManagedServer,
        host: &RemoteHost,
    ) -> Result<ConsoleClient> {
        let password = self.vault.decrypt(&server.console_secret)?;
        ConsoleClient::connect(
            &host.addr,
            server.console_port,
            &password,
            self.config.ssh.command_timeout,
        )
        .await
    }

    // ========================================================================
    // File manager
    // ========================================================================

    /// Lists a directory under the server root. Traversal attempts are
    /// rejected before any session is touched.
    pub async fn list_files(&self, id: ServerId, requested: &str) -> Result<Arc<Vec<DirEntry>>> {
        let (server, _, root) = self.server_context(id).await?;
        remote::paths::resolve_within_root(&root, requested)?;

        let session = self.session_for(server.host_id).await?;
        remote::listing::list_directory(
            &*session,
            &self.listings,
            server.host_id,
            &root,
            requested,
            self.config.ssh.command_timeout,
        )
        .await
    }

    /// Reads a text file under the server root.
    pub async fn read_server_file(&self, id: ServerId, requested: &str) -> Result<String> {
        let (server, _, root) = self.server_context(id).await?;
        remote::paths::resolve_within_root(&root, requested)?;

        let session = self.session_for(server.host_id).await?;
        remote::read_file(&*session, &root, requested, self.config.ssh.command_timeout).await
    }

    /// Writes a text file under the server root.
    pub async fn write_server_file(
        &self,
        id: ServerId,
        requested: &str,
        content: &str,
    ) -> Result<()> {
        let (server, _, root) = self.server_context(id).await?;
        remote::paths::resolve_within_root(&root, requested)?;

        let session = self.session_for(server.host_id).await?;
        remote::write_file(
            &*session,
            &root,
            requested,
            content,
            self.config.ssh.command_timeout,
        )
        .await?;
        self.listings.invalidate_host(server.host_id);
        Ok(())
    }

    /// Uploads a validated file into a directory under the server root.
    /// Returns the absolute remote path written.
    pub async fn upload_server_file(
        &self,
        id: ServerId,
        destination_dir: &str,
        raw_name: &str,
        content: &[u8],
    ) -> Result<String> {
        let (server, _, root) = self.server_context(id).await?;
        remote::paths::resolve_within_root(&root, destination_dir)?;

        let session = self.session_for(server.host_id).await?;
        let written = remote::upload_file(
            &*session,
            &self.upload_policy(),
            &root,
            destination_dir,
            raw_name,
            content,
        )
        .await?;
        self.listings.invalidate_host(server.host_id);
        Ok(written)
    }

    /// Downloads a file under the server root. Size-capped.
    pub async fn download_server_file(&self, id: ServerId, requested: &str) -> Result<Vec<u8>> {
        let (server, _, root) = self.server_context(id).await?;
        remote::paths::resolve_within_root(&root, requested)?;

        let session = self.session_for(server.host_id).await?;
        remote::files::download_file(
            &*session,
            &self.upload_policy(),
            &root,
            requested,
            self.config.ssh.command_timeout,
        )
        .await
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Samples CPU, memory and uptime of a server's process. A missing
    /// process is reported as `NotRunning`, not an error.
    pub async fn server_metrics(&self, id: ServerId) -> Result<ProcessMetrics> {
        let server = self.store.server(id).await?;
        let session = self.session_for(server.host_id).await?;
        remote::metrics::process_metrics(
            &*session,
            &server.internal_name,
            self.config.ssh.command_timeout,
        )
        .await
    }

    /// Samples load, memory and disk usage of a host.
    pub async fn host_metrics(&self, id: HostId) -> Result<HostMetrics> {
        let session = self.session_for(id).await?;
        remote::metrics::host_metrics(&*session, self.config.ssh.command_timeout).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start,
    Stop,
}

/// Builds the absolute directory `rm -rf` removes, refusing any path
/// assembled from components that could step outside the layout.
fn removal_root(base_dir: &str, username: &str, internal_name: &str) -> Option<String> {
    let safe = |s: &str| {
        !s.is_empty()
            && s != "."
            && s != ".."
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };

    if !safe(username) || !safe(internal_name) {
        return None;
    }
    if base_dir.is_empty() || !base_dir.split('/').all(safe) {
        return None;
    }
    Some(format!("/home/{username}/{base_dir}/{internal_name}"))
}
