//! Open-connection bookkeeping for graceful drain.
//!
//! Every accepted socket holds a [`ConnectionGuard`] for as long as its
//! connection task runs. `HttpServer::stop` uses [`ConnectionTracker::wait_for_idle`]
//! to give in-flight requests the grace period before the worker pool is torn down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::observability::metrics;

/// Per-server connection number, used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    next_id: AtomicU64,
    open: AtomicUsize,
    total: AtomicU64,
    drained: Notify,
}

/// Shared view of the connections a server currently holds.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counters: Arc<Counters>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted connection from `peer`.
    pub fn track(&self, peer: SocketAddr) -> ConnectionGuard {
        let id = ConnectionId(self.counters.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        metrics::record_active_connections(open);
        ConnectionGuard {
            counters: Arc::clone(&self.counters),
            id,
            peer,
            opened_at: Instant::now(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Connections accepted since the tracker was created.
    pub fn total_count(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }

    /// True once every connection closed, false if `timeout` ran out first.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                // Register interest before the check so a close in between is not missed.
                let notified = self.counters.drained.notified();
                if self.active_count() == 0 {
                    break;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Held by a connection task; closing is recorded on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<Counters>,
    id: ConnectionId,
    peer: SocketAddr,
    opened_at: Instant,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let open = self.counters.open.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_active_connections(open);
        if open == 0 {
            self.counters.drained.notify_waiters();
        }
        tracing::trace!(
            connection_id = %self.id,
            peer_addr = %self.peer,
            lifetime_ms = self.opened_at.elapsed().as_millis() as u64,
            "Connection released"
        );
    }
}
