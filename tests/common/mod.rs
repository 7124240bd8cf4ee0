//! Shared test utilities and fixtures for the craftops test suite.
//!
//! This module provides:
//! - A scripted [`Connection`] fake with a recorded command log
//! - A counting [`Connector`] fake the pool draws sessions from
//! - A fully wired provisioning rig over [`MemoryStore`]
//! - Fixture builders for hosts, credentials and server specs
//!
//! # Usage
//!
//! Include this module in your integration tests:
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use craftops::config::CoreConfig;
use craftops::connection::{
    CommandOutput, Connection, ConnectionError, ConnectionPool, ConnectionResult, Connector,
    PoolConfig,
};
use craftops::model::{
    AccountId, AuthMethod, HostCredentials, HostId, ManagedServer, Reachability, RemoteHost,
    ServerId, ServerSpec, ServerStatus, ServerVariant,
};
use craftops::provision::{ArtifactResolver, Provisioner, ResolverConfig};
use craftops::store::{MemoryStore, StateStore};
use craftops::vault::SecretVault;

/// Master secret every test vault is keyed with. Long enough to pass the
/// startup self-check.
pub const MASTER_SECRET: &str = "an-integration-test-master-secret-0123456789";

// ============================================================================
// Command output helpers
// ============================================================================

/// A successful output with the given stdout.
pub fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput::success(stdout.to_string(), String::new())
}

/// A failed output with the given exit code and stderr.
pub fn err_output(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput::failure(exit_code, String::new(), stderr.to_string())
}

// ============================================================================
// Mock connection
// ============================================================================

/// A scripted stand-in for an SSH session.
///
/// Outputs are registered against command fragments and matched by
/// substring, first registered match wins; anything unmatched gets the
/// default result. Fragment matching keeps scripts stable against the
/// random suffix in generated server names, which is embedded in most
/// provisioning commands.
pub struct MockConnection {
    identifier: String,
    alive: AtomicBool,
    should_fail: AtomicBool,
    fail_transfers: AtomicBool,
    results: RwLock<Vec<(String, CommandOutput)>>,
    default_result: RwLock<CommandOutput>,
    commands: RwLock<Vec<String>>,
    files: RwLock<HashMap<String, Vec<u8>>>,
    uploads: RwLock<Vec<(String, Vec<u8>, Option<u32>)>>,
}

impl MockConnection {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            alive: AtomicBool::new(true),
            should_fail: AtomicBool::new(false),
            fail_transfers: AtomicBool::new(false),
            results: RwLock::new(Vec::new()),
            default_result: RwLock::new(ok_output("")),
            commands: RwLock::new(Vec::new()),
            files: RwLock::new(HashMap::new()),
            uploads: RwLock::new(Vec::new()),
        }
    }

    /// Registers the output for any command containing `fragment`.
    pub fn set_command_result(&self, fragment: impl Into<String>, result: CommandOutput) {
        self.results.write().push((fragment.into(), result));
    }

    /// Sets the output for commands no fragment matches.
    pub fn set_default_result(&self, result: CommandOutput) {
        *self.default_result.write() = result;
    }

    /// Makes every subsequent execute return a transport error.
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Makes every subsequent transfer return a transport error.
    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Every command executed so far, in order.
    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().clone()
    }

    /// Commands containing the fragment, in order.
    pub fn commands_matching(&self, fragment: &str) -> Vec<String> {
        self.commands
            .read()
            .iter()
            .filter(|c| c.contains(fragment))
            .cloned()
            .collect()
    }

    pub fn command_count(&self) -> usize {
        self.commands.read().len()
    }

    /// Forgets the command log. Lets a test separate the provisioning
    /// phase from the assertions that follow it.
    pub fn clear_commands(&self) {
        self.commands.write().clear();
    }

    /// Seeds a file into the virtual remote filesystem.
    pub fn put_remote_file(&self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), content.into());
    }

    /// Content currently stored at a remote path, if any.
    pub fn get_remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(path).cloned()
    }

    /// Every upload so far as (remote path, content, mode).
    pub fn get_uploads(&self) -> Vec<(String, Vec<u8>, Option<u32>)> {
        self.uploads.read().clone()
    }

    /// The single upload whose remote path contains the fragment. Panics
    /// when there are zero or several.
    pub fn upload_to(&self, path_fragment: &str) -> (String, Vec<u8>, Option<u32>) {
        let uploads = self.uploads.read();
        let matching: Vec<_> = uploads
            .iter()
            .filter(|(path, _, _)| path.contains(path_fragment))
            .cloned()
            .collect();
        assert_eq!(
            matching.len(),
            1,
            "expected exactly one upload matching '{path_fragment}', got {}",
            matching.len()
        );
        matching.into_iter().next().unwrap()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn execute(&self, command: &str, _timeout: Duration) -> ConnectionResult<CommandOutput> {
        self.commands.write().push(command.to_string());
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::ExecutionFailed(
                "scripted execute failure".to_string(),
            ));
        }
        for (fragment, result) in self.results.read().iter() {
            if command.contains(fragment.as_str()) {
                return Ok(result.clone());
            }
        }
        Ok(self.default_result.read().clone())
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()> {
        let content = std::fs::read(local_path)?;
        self.upload_content(&content, remote_path, mode).await
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(ConnectionError::TransferFailed(
                "scripted transfer failure".to_string(),
            ));
        }
        self.files
            .write()
            .insert(remote_path.to_string(), content.to_vec());
        self.uploads
            .write()
            .push((remote_path.to_string(), content.to_vec(), mode));
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> ConnectionResult<()> {
        let content = self.download_content(remote_path).await?;
        std::fs::write(local_path, content)?;
        Ok(())
    }

    async fn download_content(&self, remote_path: &str) -> ConnectionResult<Vec<u8>> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(ConnectionError::TransferFailed(
                "scripted transfer failure".to_string(),
            ));
        }
        self.files
            .read()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| ConnectionError::TransferFailed(format!("no such file: {remote_path}")))
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Mock connector
// ============================================================================

/// Hands the same scripted connection to every acquire and counts how
/// often the pool asked for a fresh session.
pub struct MockConnector {
    connection: RwLock<Arc<MockConnection>>,
    connects: AtomicU32,
    refuse: AtomicBool,
}

impl MockConnector {
    pub fn new(connection: Arc<MockConnection>) -> Self {
        Self {
            connection: RwLock::new(connection),
            connects: AtomicU32::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    /// Number of connect attempts, refused ones included.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Makes every subsequent connect fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Swaps the connection handed out next.
    pub fn replace_connection(&self, connection: Arc<MockConnection>) {
        *self.connection.write() = connection;
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        credentials: &HostCredentials,
    ) -> ConnectionResult<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionFailed(format!(
                "scripted refusal for {}",
                credentials.endpoint()
            )));
        }
        Ok(self.connection.read().clone())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Core configuration tuned for tests: a short grace period and sweep
/// interval so convergence settles in milliseconds.
pub fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.vault.master_secret = MASTER_SECRET.to_string();
    config.provision.grace_period = Duration::from_millis(20);
    config.reconcile.interval = Duration::from_millis(50);
    config.ssh.command_timeout = Duration::from_secs(5);
    config.ssh.probe_timeout = Duration::from_secs(2);
    config
}

/// Credentials matching the scripted host.
pub fn credentials() -> HostCredentials {
    HostCredentials {
        addr: "198.51.100.7".to_string(),
        port: 22,
        username: "mc".to_string(),
        auth: AuthMethod::Password {
            password: "pw".to_string(),
        },
        host_key_fingerprint: None,
    }
}

/// A registered, probed host owned by `account`.
pub fn host_record(account: AccountId) -> RemoteHost {
    RemoteHost {
        id: HostId::new(),
        account_id: account,
        addr: "198.51.100.7".to_string(),
        port: 22,
        username: "mc".to_string(),
        reachability: Reachability::Connected,
        last_error: None,
        last_checked_at: None,
        capacity: None,
    }
}

/// A Paper server spec with automatic port allocation.
pub fn paper_spec(name: &str) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        variant: ServerVariant::Paper,
        version: "1.21.1".to_string(),
        memory_mb: 2048,
        max_players: 20,
        ports: None,
    }
}

/// Plaintext console secret baked into every seeded server record.
pub const CONSOLE_SECRET: &str = "0123456789abcdef0123456789abcdef";

/// A server record seeded directly into the store, bypassing
/// provisioning. The console secret is [`CONSOLE_SECRET`] encrypted
/// under the test master secret.
pub fn server_record(
    account: AccountId,
    host: HostId,
    name: &str,
    status: ServerStatus,
    game_port: u16,
    console_port: u16,
) -> ManagedServer {
    let console_secret = SecretVault::new(MASTER_SECRET)
        .encrypt(CONSOLE_SECRET)
        .expect("console secret fixture");
    ManagedServer {
        id: ServerId::new(),
        account_id: account,
        host_id: host,
        internal_name: craftops::model::generate_internal_name(name),
        name: name.to_string(),
        variant: ServerVariant::Purpur,
        version: "1.21.1".to_string(),
        memory_mb: 2048,
        max_players: 20,
        game_port,
        console_port,
        console_secret,
        status,
        last_error: None,
        online_players: None,
        last_started_at: None,
        last_stopped_at: None,
        created_at: chrono::Utc::now(),
    }
}

// ============================================================================
// Provisioning rig
// ============================================================================

/// A fully wired provisioning stack over scripted connections and an
/// in-memory store, with one host registered and its credentials in
/// place.
pub struct TestRig {
    pub config: CoreConfig,
    pub store: Arc<MemoryStore>,
    pub conn: Arc<MockConnection>,
    pub connector: Arc<MockConnector>,
    pub pool: Arc<ConnectionPool>,
    pub provisioner: Arc<Provisioner>,
    pub account: AccountId,
    pub host: RemoteHost,
}

impl TestRig {
    /// Builds the rig against an unroutable metadata endpoint. Fine for
    /// every test that never resolves an artifact over HTTP; resolver
    /// tests pass a wiremock-backed resolver to [`TestRig::with_resolver`].
    pub async fn new() -> Self {
        let resolver =
            ArtifactResolver::with_config(ResolverConfig::with_base_url("http://127.0.0.1:9"))
                .expect("resolver construction");
        Self::with_resolver(resolver).await
    }

    pub async fn with_resolver(resolver: ArtifactResolver) -> Self {
        let config = test_config();
        let conn = Arc::new(MockConnection::new("mock-host"));
        let connector = Arc::new(MockConnector::new(conn.clone()));
        let pool = Arc::new(ConnectionPool::with_connector(
            PoolConfig::from(&config.ssh),
            connector.clone(),
        ));
        let store = Arc::new(MemoryStore::new());
        let account = AccountId::new();
        let host = host_record(account);
        store
            .insert_host(host.clone())
            .await
            .expect("host fixture insert");
        store.put_credentials(host.id, credentials());

        let provisioner = Arc::new(
            Provisioner::with_resolver(
                config.clone(),
                store.clone(),
                store.clone(),
                pool.clone(),
                SecretVault::new(MASTER_SECRET),
                resolver,
            )
            .expect("provisioner construction"),
        );

        Self {
            config,
            store,
            conn,
            connector,
            pool,
            provisioner,
            account,
            host,
        }
    }

    /// The vault this rig encrypts console secrets with.
    pub fn vault(&self) -> SecretVault {
        SecretVault::new(MASTER_SECRET)
    }
}

// ============================================================================
// Async helpers
// ============================================================================

/// Polls the store until the server reaches `want`. Panics with the last
/// observed record on timeout.
pub async fn wait_for_status(
    store: &Arc<MemoryStore>,
    id: ServerId,
    want: ServerStatus,
) -> ManagedServer {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let server = store.server(id).await.expect("server record");
        if server.status == want {
            return server;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "server never reached {want}: stuck at {} (last error {:?})",
            server.status,
            server.last_error
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Polls until `probe` returns true. Panics on timeout.
pub async fn wait_until<F>(what: &str, mut probe: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !probe() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
