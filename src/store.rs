//! Persistence seam.
//!
//! The orchestration core never owns a database. The embedding layer
//! implements [`StateStore`] and [`CredentialSource`] over whatever it
//! persists with, and every state transition the workflows produce is
//! reported through these traits. [`MemoryStore`] is the in-process
//! implementation backing tests and the CLI.
//!
//! Status writes come in two strengths. [`StateStore::compare_and_set_status`]
//! is the gate for user-driven transitions (start requires `Stopped`, stop
//! requires `Running`) and must be atomic: two racing callers get exactly
//! one winner, the loser sees `InvalidTransition`. Background commits use
//! the unconditional [`StateStore::set_status`], where the last write wins
//! and the next reconciliation sweep heals any transient disagreement.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::model::{
    AccountId, HostCredentials, HostId, ManagedServer, RemoteHost, ServerId, ServerStatus,
};

// ============================================================================
// Status patches
// ============================================================================

/// Field updates applied together with a status write.
///
/// Timestamps are stamped by the store at apply time so that external
/// implementations can map them to their own clock (`NOW()` in SQL).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPatch {
    /// Record this failure message
    pub error_message: Option<String>,
    /// Clear any recorded failure message
    pub clear_error: bool,
    /// Stamp `last_started_at` with the current time
    pub stamp_started: bool,
    /// Stamp `last_stopped_at` with the current time
    pub stamp_stopped: bool,
    /// Forget the cached online player count
    pub clear_online_players: bool,
}

impl StatusPatch {
    /// A bare status flip with no side effects.
    pub fn none() -> Self {
        Self::default()
    }

    /// Commit of a successful start.
    pub fn started() -> Self {
        Self {
            clear_error: true,
            stamp_started: true,
            ..Self::default()
        }
    }

    /// Commit of a successful stop.
    pub fn stopped() -> Self {
        Self {
            clear_error: true,
            stamp_stopped: true,
            clear_online_players: true,
            ..Self::default()
        }
    }

    /// Records a failure message alongside the status write.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Applies the status and patch to a materialized record. Stores that
    /// hold full records delegate here so the semantics stay in one place.
    pub fn apply(&self, server: &mut ManagedServer, status: ServerStatus) {
        server.status = status;
        if self.clear_error {
            server.last_error = None;
        }
        if let Some(ref message) = self.error_message {
            server.last_error = Some(message.clone());
        }
        if self.stamp_started {
            server.last_started_at = Some(Utc::now());
        }
        if self.stamp_stopped {
            server.last_stopped_at = Some(Utc::now());
        }
        if self.clear_online_players {
            server.online_players = None;
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Host and server records as the embedding layer persists them.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Adds a host record.
    async fn insert_host(&self, host: RemoteHost) -> Result<()>;

    /// Fetches a host by id.
    async fn host(&self, id: HostId) -> Result<RemoteHost>;

    /// Replaces an existing host record.
    async fn update_host(&self, host: RemoteHost) -> Result<()>;

    /// Removes a host record.
    async fn remove_host(&self, id: HostId) -> Result<()>;

    /// All registered hosts.
    async fn list_hosts(&self) -> Result<Vec<RemoteHost>>;

    /// Adds a server record.
    async fn insert_server(&self, server: ManagedServer) -> Result<()>;

    /// Fetches a server by id.
    async fn server(&self, id: ServerId) -> Result<ManagedServer>;

    /// Replaces an existing server record.
    async fn update_server(&self, server: ManagedServer) -> Result<()>;

    /// Removes a server record.
    async fn remove_server(&self, id: ServerId) -> Result<()>;

    /// All managed servers.
    async fn list_servers(&self) -> Result<Vec<ManagedServer>>;

    /// Servers placed on the given host.
    async fn servers_on_host(&self, host: HostId) -> Result<Vec<ManagedServer>>;

    /// Servers owned by the given account.
    async fn servers_for_account(&self, account: AccountId) -> Result<Vec<ManagedServer>>;

    /// Atomically flips the status if and only if the recorded status
    /// equals `expected`, applying the patch in the same write. Returns
    /// the updated record, or `InvalidTransition` when another caller won
    /// the race.
    async fn compare_and_set_status(
        &self,
        id: ServerId,
        expected: ServerStatus,
        next: ServerStatus,
        patch: StatusPatch,
    ) -> Result<ManagedServer>;

    /// Unconditional status write for background commits. Last write wins.
    async fn set_status(
        &self,
        id: ServerId,
        next: ServerStatus,
        patch: StatusPatch,
    ) -> Result<ManagedServer>;
}

/// Supplies decrypted connection credentials for a host. The embedding
/// layer keeps them encrypted at rest and decrypts through the vault on
/// the way in.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Decrypted credentials for the host.
    async fn credentials(&self, host: HostId) -> Result<HostCredentials>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory [`StateStore`] and [`CredentialSource`].
///
/// Enforces the record invariants a real backend would carry as unique
/// indexes: internal names are globally unique and each (host, port) is
/// assigned at most once.
#[derive(Default)]
pub struct MemoryStore {
    hosts: DashMap<HostId, RemoteHost>,
    servers: DashMap<ServerId, ManagedServer>,
    credentials: DashMap<HostId, HostCredentials>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers decrypted credentials for a host.
    pub fn put_credentials(&self, host: HostId, credentials: HostCredentials) {
        self.credentials.insert(host, credentials);
    }

    fn check_server_invariants(&self, server: &ManagedServer) -> Result<()> {
        for existing in self.servers.iter() {
            if existing.id == server.id {
                return Err(Error::Store(format!(
                    "server {} already exists",
                    server.id
                )));
            }
            if existing.internal_name == server.internal_name {
                return Err(Error::Store(format!(
                    "internal name '{}' already in use",
                    server.internal_name
                )));
            }
            if existing.host_id == server.host_id
                && (existing.game_port == server.game_port
                    || existing.console_port == server.console_port)
            {
                return Err(Error::Store(format!(
                    "port already assigned on host {}: game {} console {}",
                    server.host_id, server.game_port, server.console_port
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn insert_host(&self, host: RemoteHost) -> Result<()> {
        if self.hosts.contains_key(&host.id) {
            return Err(Error::Store(format!("host {} already exists", host.id)));
        }
        self.hosts.insert(host.id, host);
        Ok(())
    }

    async fn host(&self, id: HostId) -> Result<RemoteHost> {
        self.hosts
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::not_found(format!("host {id}")))
    }

    async fn update_host(&self, host: RemoteHost) -> Result<()> {
        match self.hosts.get_mut(&host.id) {
            Some(mut entry) => {
                *entry = host;
                Ok(())
            }
            None => Err(Error::not_found(format!("host {}", host.id))),
        }
    }

    async fn remove_host(&self, id: HostId) -> Result<()> {
        self.hosts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("host {id}")))
    }

    async fn list_hosts(&self) -> Result<Vec<RemoteHost>> {
        Ok(self.hosts.iter().map(|r| r.value().clone()).collect())
    }

    async fn insert_server(&self, server: ManagedServer) -> Result<()> {
        self.check_server_invariants(&server)?;
        self.servers.insert(server.id, server);
        Ok(())
    }

    async fn server(&self, id: ServerId) -> Result<ManagedServer> {
        self.servers
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::not_found(format!("server {id}")))
    }

    async fn update_server(&self, server: ManagedServer) -> Result<()> {
        match self.servers.get_mut(&server.id) {
            Some(mut entry) => {
                *entry = server;
                Ok(())
            }
            None => Err(Error::not_found(format!("server {}", server.id))),
        }
    }

    async fn remove_server(&self, id: ServerId) -> Result<()> {
        self.servers
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("server {id}")))
    }

    async fn list_servers(&self) -> Result<Vec<ManagedServer>> {
        Ok(self.servers.iter().map(|r| r.value().clone()).collect())
    }

    async fn servers_on_host(&self, host: HostId) -> Result<Vec<ManagedServer>> {
        Ok(self
            .servers
            .iter()
            .filter(|r| r.value().host_id == host)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn servers_for_account(&self, account: AccountId) -> Result<Vec<ManagedServer>> {
        Ok(self
            .servers
            .iter()
            .filter(|r| r.value().account_id == account)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn compare_and_set_status(
        &self,
        id: ServerId,
        expected: ServerStatus,
        next: ServerStatus,
        patch: StatusPatch,
    ) -> Result<ManagedServer> {
        // get_mut holds the shard write lock, making check-then-write atomic.
        let mut entry = self
            .servers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("server {id}")))?;
        if entry.status != expected {
            return Err(Error::InvalidTransition {
                expected,
                actual: entry.status,
            });
        }
        patch.apply(&mut entry, next);
        Ok(entry.clone())
    }

    async fn set_status(
        &self,
        id: ServerId,
        next: ServerStatus,
        patch: StatusPatch,
    ) -> Result<ManagedServer> {
        let mut entry = self
            .servers
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("server {id}")))?;
        patch.apply(&mut entry, next);
        Ok(entry.clone())
    }
}

#[async_trait]
impl CredentialSource for MemoryStore {
    async fn credentials(&self, host: HostId) -> Result<HostCredentials> {
        self.credentials
            .get(&host)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::not_found(format!("credentials for host {host}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthMethod, ServerVariant};

    fn server(name: &str, host: HostId, game: u16, console: u16) -> ManagedServer {
        ManagedServer {
            id: ServerId::new(),
            account_id: AccountId::new(),
            host_id: host,
            internal_name: name.to_string(),
            name: name.to_string(),
            variant: ServerVariant::Paper,
            version: "1.21.1".to_string(),
            memory_mb: 2048,
            max_players: 20,
            game_port: game,
            console_port: console,
            console_secret: "deadbeef".to_string(),
            status: ServerStatus::Stopped,
            last_error: None,
            online_players: None,
            last_started_at: None,
            last_stopped_at: None,
            created_at: Utc::now(),
        }
    }

    fn host() -> RemoteHost {
        RemoteHost {
            id: HostId::new(),
            account_id: AccountId::new(),
            addr: "198.51.100.7".to_string(),
            port: 22,
            username: "mc".to_string(),
            reachability: crate::model::Reachability::Pending,
            last_error: None,
            last_checked_at: None,
            capacity: None,
        }
    }

    #[tokio::test]
    async fn host_crud_round_trip() {
        let store = MemoryStore::new();
        let mut h = host();

        store.insert_host(h.clone()).await.unwrap();
        assert_eq!(store.host(h.id).await.unwrap().addr, "198.51.100.7");

        h.reachability = crate::model::Reachability::Connected;
        store.update_host(h.clone()).await.unwrap();
        assert_eq!(
            store.host(h.id).await.unwrap().reachability,
            crate::model::Reachability::Connected
        );

        store.remove_host(h.id).await.unwrap();
        assert!(matches!(store.host(h.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_host_insert_is_rejected() {
        let store = MemoryStore::new();
        let h = host();
        store.insert_host(h.clone()).await.unwrap();
        assert!(matches!(
            store.insert_host(h).await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn internal_name_is_globally_unique() {
        let store = MemoryStore::new();
        let s = server("mc-alpha-0001", HostId::new(), 25565, 26565);
        store.insert_server(s.clone()).await.unwrap();

        // Same name, different host and ports.
        let dup = server("mc-alpha-0001", HostId::new(), 25566, 26566);
        assert!(matches!(
            store.insert_server(dup).await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn port_pairs_are_unique_per_host_only() {
        let store = MemoryStore::new();
        let h = HostId::new();

        store
            .insert_server(server("mc-a-0001", h, 25565, 26565))
            .await
            .unwrap();
        // Same game port on the same host collides.
        assert!(store
            .insert_server(server("mc-b-0001", h, 25565, 26566))
            .await
            .is_err());
        // Same console port on the same host collides.
        assert!(store
            .insert_server(server("mc-c-0001", h, 25566, 26565))
            .await
            .is_err());
        // Identical pair on another host is fine.
        store
            .insert_server(server("mc-d-0001", HostId::new(), 25565, 26565))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cas_flips_only_from_the_expected_status() {
        let store = MemoryStore::new();
        let s = server("mc-cas-0001", HostId::new(), 25565, 26565);
        let id = s.id;
        store.insert_server(s).await.unwrap();

        let updated = store
            .compare_and_set_status(
                id,
                ServerStatus::Stopped,
                ServerStatus::Starting,
                StatusPatch::none(),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ServerStatus::Starting);

        // A second caller expecting Stopped loses the race.
        let err = store
            .compare_and_set_status(
                id,
                ServerStatus::Stopped,
                ServerStatus::Starting,
                StatusPatch::none(),
            )
            .await
            .unwrap_err();
        match err {
            Error::InvalidTransition { expected, actual } => {
                assert_eq!(expected, ServerStatus::Stopped);
                assert_eq!(actual, ServerStatus::Starting);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_status_is_unconditional() {
        let store = MemoryStore::new();
        let s = server("mc-bg-0001", HostId::new(), 25565, 26565);
        let id = s.id;
        store.insert_server(s).await.unwrap();

        let updated = store
            .set_status(id, ServerStatus::Error, StatusPatch::failed("boom"))
            .await
            .unwrap();
        assert_eq!(updated.status, ServerStatus::Error);
        assert_eq!(updated.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn patches_stamp_and_clear_fields() {
        let store = MemoryStore::new();
        let mut s = server("mc-patch-0001", HostId::new(), 25565, 26565);
        s.online_players = Some(5);
        s.last_error = Some("old failure".to_string());
        let id = s.id;
        store.insert_server(s).await.unwrap();

        let running = store
            .set_status(id, ServerStatus::Running, StatusPatch::started())
            .await
            .unwrap();
        assert!(running.last_started_at.is_some());
        assert_eq!(running.last_error, None);
        // A start commit leaves the player count alone.
        assert_eq!(running.online_players, Some(5));

        let stopped = store
            .set_status(id, ServerStatus::Stopped, StatusPatch::stopped())
            .await
            .unwrap();
        assert!(stopped.last_stopped_at.is_some());
        assert_eq!(stopped.online_players, None);
    }

    #[tokio::test]
    async fn account_and_host_filters() {
        let store = MemoryStore::new();
        let h1 = HostId::new();
        let h2 = HostId::new();
        let mut a = server("mc-one-0001", h1, 25565, 26565);
        let account = a.account_id;
        let mut b = server("mc-two-0001", h1, 25566, 26566);
        b.account_id = account;
        let c = server("mc-three-0001", h2, 25565, 26565);

        store.insert_server(a.clone()).await.unwrap();
        store.insert_server(b).await.unwrap();
        store.insert_server(c).await.unwrap();

        assert_eq!(store.servers_on_host(h1).await.unwrap().len(), 2);
        assert_eq!(store.servers_on_host(h2).await.unwrap().len(), 1);
        assert_eq!(store.servers_for_account(account).await.unwrap().len(), 2);

        a.memory_mb = 4096;
        store.update_server(a.clone()).await.unwrap();
        assert_eq!(store.server(a.id).await.unwrap().memory_mb, 4096);
    }

    #[tokio::test]
    async fn credentials_lookup() {
        let store = MemoryStore::new();
        let h = HostId::new();
        assert!(store.credentials(h).await.is_err());

        store.put_credentials(
            h,
            HostCredentials {
                addr: "198.51.100.7".to_string(),
                port: 22,
                username: "mc".to_string(),
                auth: AuthMethod::Password {
                    password: "pw".to_string(),
                },
                host_key_fingerprint: None,
            },
        );
        assert_eq!(store.credentials(h).await.unwrap().port, 22);
    }
}
