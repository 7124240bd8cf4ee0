//! Status reconciliation sweep.
//!
//! The supervisor on the remote host is the source of truth for whether a
//! server runs; the store only mirrors it. [`Reconciler`] periodically
//! probes every non-`Error` server and corrects the mirror: out-of-band
//! starts, crashes, and completed transitions all converge to the probed
//! state. Transition planning is a pure function so the drift table is
//! testable without a connection.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::CoreConfig;
use crate::connection::ConnectionPool;
use crate::error::Result;
use crate::model::{ManagedServer, ServerStatus};
use crate::remote;
use crate::store::{CredentialSource, StateStore, StatusPatch};

/// Plans the store write for one probe observation.
///
/// `None` means the record already matches or the server is still
/// converging (`Starting` with an inactive probe flaps if corrected too
/// eagerly).
pub fn plan_transition(
    active: bool,
    recorded: ServerStatus,
) -> Option<(ServerStatus, StatusPatch)> {
    match (active, recorded) {
        (true, ServerStatus::Stopped | ServerStatus::Starting) => {
            Some((ServerStatus::Running, StatusPatch::started()))
        }
        (false, ServerStatus::Running | ServerStatus::Stopping) => {
            Some((ServerStatus::Stopped, StatusPatch::stopped()))
        }
        _ => None,
    }
}

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Servers whose unit was probed
    pub probed: usize,
    /// Drift corrections written to the store
    pub transitions: usize,
    /// Probes or writes that failed (isolated, not fatal)
    pub failures: usize,
}

enum Outcome {
    Unchanged,
    Transitioned,
    Failed,
}

/// Periodic sweep reconciling recorded status against the supervisor.
pub struct Reconciler {
    store: Arc<dyn StateStore>,
    credentials: Arc<dyn CredentialSource>,
    pool: Arc<ConnectionPool>,
    interval: Duration,
    probe_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        config: &CoreConfig,
        store: Arc<dyn StateStore>,
        credentials: Arc<dyn CredentialSource>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            store,
            credentials,
            pool,
            interval: config.reconcile.interval,
            probe_timeout: config.ssh.probe_timeout,
        }
    }

    /// One full sweep. Per-server failures are logged and counted but
    /// never abort the rest; a second sweep over unchanged remote state
    /// plans zero transitions.
    pub async fn run_once(&self) -> SweepSummary {
        let servers = match self.store.list_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                error!(error = %e, "Sweep could not list servers");
                return SweepSummary {
                    failures: 1,
                    ..SweepSummary::default()
                };
            }
        };

        let candidates: Vec<ManagedServer> = servers
            .into_iter()
            .filter(|s| s.status != ServerStatus::Error)
            .collect();

        // Concurrent fan-out; the pool serializes per host underneath.
        let outcomes = join_all(candidates.iter().map(|s| self.reconcile_one(s))).await;

        let mut summary = SweepSummary {
            probed: candidates.len(),
            ..SweepSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Unchanged => {}
                Outcome::Transitioned => summary.transitions += 1,
                Outcome::Failed => summary.failures += 1,
            }
        }
        summary
    }

    /// Spawns the interval loop. The first sweep runs immediately.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let summary = this.run_once().await;
                debug!(
                    probed = summary.probed,
                    transitions = summary.transitions,
                    failures = summary.failures,
                    "Reconciliation sweep finished"
                );
            }
        })
    }

    async fn reconcile_one(&self, server: &ManagedServer) -> Outcome {
        let active = match self.probe(server).await {
            Ok(active) => active,
            Err(e) => {
                warn!(server = %server.id, error = %e, "Probe failed during sweep");
                return Outcome::Failed;
            }
        };

        match plan_transition(active, server.status) {
            Some((status, patch)) => {
                info!(
                    server = %server.id,
                    from = %server.status,
                    to = %status,
                    "Reconciling drift"
                );
                match self.store.set_status(server.id, status, patch).await {
                    Ok(_) => Outcome::Transitioned,
                    Err(e) => {
                        warn!(server = %server.id, error = %e, "Could not persist reconciled status");
                        Outcome::Failed
                    }
                }
            }
            None => Outcome::Unchanged,
        }
    }

    async fn probe(&self, server: &ManagedServer) -> Result<bool> {
        let credentials = self.credentials.credentials(server.host_id).await?;
        let session = self.pool.acquire(server.host_id, &credentials).await?;
        let state =
            remote::service::is_active(&*session, &server.unit_name(), self.probe_timeout).await?;
        Ok(state.is_active())
    }
}
