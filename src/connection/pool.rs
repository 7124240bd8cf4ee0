//! Session pooling keyed by host id.
//!
//! The pool keeps at most one live SSH session per registered host and
//! hands out shared handles to it. Sessions multiplex channels, so many
//! concurrent commands ride one session safely; what must not happen is
//! two sessions racing to the same host or two tasks both paying the
//! handshake. A per-host async mutex serializes establishment while
//! distinct hosts proceed in parallel.
//!
//! A pooled session is reused only when it passes a cheap liveness probe
//! (a remote echo) and has not sat idle past the configured window;
//! otherwise it is closed and replaced transparently. `close` is
//! idempotent and backs the host-removal path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::model::{HostCredentials, HostId};

use super::{into_crate_error, Connection, Connector, SshConnector};

/// Command used as the liveness probe.
const LIVENESS_PROBE: &str = "echo ok";

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Establishment deadline handed to the connector
    pub connect_timeout: Duration,
    /// Idle window after which a pooled session is evicted
    pub idle_timeout: Duration,
    /// Deadline for the liveness probe
    pub probe_timeout: Duration,
    /// How often the background reaper scans for idle sessions
    pub reaper_interval: Duration,
}

impl PoolConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the idle eviction window.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the liveness probe deadline.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the reaper scan interval.
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

impl From<&crate::config::SshConfig> for PoolConfig {
    fn from(ssh: &crate::config::SshConfig) -> Self {
        Self {
            connect_timeout: ssh.connect_timeout,
            idle_timeout: ssh.idle_timeout,
            probe_timeout: ssh.probe_timeout,
            reaper_interval: Duration::from_secs(60),
        }
    }
}

/// Pool counters, read through [`ConnectionPool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Sessions reused from the pool
    pub hits: u64,
    /// Sessions established fresh
    pub misses: u64,
    /// Sessions closed for idleness or failed probes
    pub evictions: u64,
}

/// A shared reference to a pooled session.
#[derive(Clone)]
pub struct SessionHandle {
    host_id: HostId,
    conn: Arc<dyn Connection>,
}

impl SessionHandle {
    /// The host this session belongs to.
    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }
}

impl std::ops::Deref for SessionHandle {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        &*self.conn
    }
}

/// One pool slot per host id.
struct Slot {
    conn: Option<Arc<dyn Connection>>,
    last_used: Instant,
}

impl Slot {
    fn empty() -> Self {
        Self {
            conn: None,
            last_used: Instant::now(),
        }
    }
}

/// Connection pool holding one session per host id.
pub struct ConnectionPool {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    slots: DashMap<HostId, Arc<Mutex<Slot>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    shutdown: AtomicBool,
}

impl ConnectionPool {
    /// Creates a pool backed by the russh connector.
    pub fn new(config: PoolConfig) -> Self {
        let connector = Arc::new(SshConnector::new(config.connect_timeout));
        Self::with_connector(config, connector)
    }

    /// Creates a pool with a custom connector. Tests inject fakes here.
    pub fn with_connector(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            slots: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Returns a live session for the host, reusing the pooled one when
    /// it is fresh and answers the liveness probe, reconnecting
    /// otherwise. Concurrent calls for the same host serialize;
    /// different hosts proceed in parallel.
    pub async fn acquire(
        &self,
        host_id: HostId,
        credentials: &HostCredentials,
    ) -> Result<SessionHandle> {
        let slot = self
            .slots
            .entry(host_id)
            .or_insert_with(|| Arc::new(Mutex::new(Slot::empty())))
            .clone();

        let mut slot = slot.lock().await;

        if let Some(conn) = slot.conn.clone() {
            let fresh = slot.last_used.elapsed() < self.config.idle_timeout;
            if fresh && self.probe(&conn).await {
                trace!(host = %host_id, "Reusing pooled session");
                slot.last_used = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(SessionHandle { host_id, conn });
            }

            debug!(
                host = %host_id,
                idle = !fresh,
                "Evicting stale pooled session"
            );
            self.evictions.fetch_add(1, Ordering::Relaxed);
            let _ = conn.close().await;
            slot.conn = None;
        }

        debug!(host = %host_id, endpoint = %credentials.endpoint(), "Establishing pooled session");
        self.misses.fetch_add(1, Ordering::Relaxed);
        let conn = self
            .connector
            .connect(credentials)
            .await
            .map_err(|e| into_crate_error(e, &credentials.addr))?;

        slot.conn = Some(Arc::clone(&conn));
        slot.last_used = Instant::now();
        Ok(SessionHandle { host_id, conn })
    }

    /// Closes and forgets the host's session. Idempotent; safe to call
    /// for hosts that never connected.
    pub async fn close(&self, host_id: HostId) -> Result<()> {
        if let Some((_, slot)) = self.slots.remove(&host_id) {
            let mut slot = slot.lock().await;
            if let Some(conn) = slot.conn.take() {
                debug!(host = %host_id, "Closing pooled session");
                let _ = conn.close().await;
            }
        }
        Ok(())
    }

    /// Closes every pooled session and stops the reaper.
    pub async fn close_all(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let hosts: Vec<HostId> = self.slots.iter().map(|e| *e.key()).collect();
        for host in hosts {
            let _ = self.close(host).await;
        }
    }

    /// True when a session is currently pooled for the host.
    pub fn is_pooled(&self, host_id: &HostId) -> bool {
        self.slots.contains_key(host_id)
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Spawns the background task that closes sessions idle past the
    /// window. Runs until [`ConnectionPool::close_all`].
    pub fn spawn_idle_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.config.reaper_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if pool.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                pool.evict_idle().await;
            }
        })
    }

    /// One reaper pass. Slots busy connecting are skipped, not awaited.
    async fn evict_idle(&self) {
        let slots: Vec<(HostId, Arc<Mutex<Slot>>)> = self
            .slots
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        for (host_id, slot) in slots {
            let Ok(mut slot) = slot.try_lock() else {
                continue;
            };
            let idle = slot
                .conn
                .is_some()
                .then(|| slot.last_used.elapsed() >= self.config.idle_timeout)
                .unwrap_or(false);
            if idle {
                if let Some(conn) = slot.conn.take() {
                    debug!(host = %host_id, "Reaping idle session");
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    let _ = conn.close().await;
                }
            }
        }
    }

    /// Liveness check: the session object is open and a trivial echo
    /// completes inside the probe deadline.
    async fn probe(&self, conn: &Arc<dyn Connection>) -> bool {
        if !conn.is_alive().await {
            return false;
        }
        match conn.execute(LIVENESS_PROBE, self.config.probe_timeout).await {
            Ok(output) => output.success,
            Err(e) => {
                warn!(endpoint = %conn.identifier(), error = %e, "Liveness probe failed");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
