//! Process lifecycle: listener startup, the global connection cap, the
//! rate-limit janitor, and graceful shutdown.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::config::Config;
use crate::error::EndReason;
use crate::geo_filter::GeoFilter;
use crate::ip_filter::{IpFilter, IpFilterStats};

const JANITOR_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub struct Supervisor {
    pub config: Config,
    pub ip_filter: IpFilter,
    pub geo_filter: GeoFilter,
    pub blocked_countries: HashSet<String>,
    pub block_unknown_countries: bool,
    active_connections: AtomicUsize,
    started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// A point-in-time snapshot for operator visibility.
#[derive(Debug, Clone)]
pub struct GatewayStats {
    pub active_connections: usize,
    pub max_connections: usize,
    pub uptime: Duration,
    pub ip_filter: IpFilterStats,
}

impl Supervisor {
    pub fn new(config: Config, ip_filter: IpFilter, geo_filter: GeoFilter) -> Arc<Self> {
        let blocked_countries = config.blocked_countries.iter().cloned().collect();
        let block_unknown_countries = config.block_unknown_countries;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Supervisor {
            config,
            ip_filter,
            geo_filter,
            blocked_countries,
            block_unknown_countries,
            active_connections: AtomicUsize::new(0),
            started_at: Instant::now(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Returns `true` if a new session may proceed through the admission
    /// pipeline. Does not itself reserve a slot — that happens in
    /// [`Supervisor::mark_admitted`] once admission passes, so that fully
    /// filtered rejections never consume (or free) a slot.
    pub fn check_capacity(&self) -> bool {
        self.active_connections.load(Ordering::Acquire) < self.config.max_connections
    }

    /// Reserves a slot for a session that has passed every admission check.
    pub fn mark_admitted(&self) {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases a session's slot. Called exactly once per admitted session,
    /// from the pump's terminal callback (or from the backend-dial-failure
    /// path, which also holds a slot).
    pub fn record_session_end(&self, reason: EndReason) {
        self.active_connections.fetch_sub(1, Ordering::AcqRel);
        debug!(reason = %reason, "session slot released");
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            active_connections: self.active_connections.load(Ordering::Acquire),
            max_connections: self.config.max_connections,
            uptime: self.started_at.elapsed(),
            ip_filter: self.ip_filter.stats(),
        }
    }

    /// Runs the IP-Filter janitor once a minute until shutdown is signaled.
    pub async fn run_janitor(self: Arc<Self>) {
        let mut shutdown = self.shutdown_signal();
        let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.ip_filter.run_janitor_pass(),
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Requests graceful shutdown: listeners stop accepting and in-flight
    /// sessions are given up to [`SHUTDOWN_GRACE_PERIOD`] to finish before
    /// the process exits unconditionally.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        warn!("graceful shutdown window elapsed, exiting");
        std::process::exit(1);
    }
}
