//! Peer registry — discovery, health and least-loaded selection
//!
//! Links are created once from the configured address list and kept
//! sorted by address. Each discovery tick dials every unreachable link
//! concurrently under a shared timeout and pings every reachable one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::PeerSettings;
use crate::error::{Error, Result};
use crate::protocol::ForwardRequest;

use super::{PeerEvent, PeerFailureCallback, PeerLink, PeerSnapshot, PeerTransport};

/// Buffered events between connection tasks and the registry
const EVENT_CHANNEL_SIZE: usize = 256;

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Discovery tuning
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Bound on every connection attempt
    pub dial_timeout: Duration,

    /// Unanswered pings before a reachable peer is demoted
    pub failure_threshold: u32,

    /// Log every dial failure at debug level
    pub debug: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_millis(500),
            failure_threshold: 3,
            debug: false,
        }
    }
}

impl DiscoveryConfig {
    pub fn from_settings(settings: &PeerSettings, debug: bool) -> Self {
        Self {
            dial_timeout: settings.dial_timeout(),
            failure_threshold: settings.failure_threshold.max(1),
            debug,
        }
    }
}

/// What one discovery tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub connected: Vec<String>,
    pub failed: Vec<String>,
    pub pinged: Vec<String>,
    pub demoted: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────
// Peer Registry
// ─────────────────────────────────────────────────────────────────

/// Exclusive owner of the configured peer links
pub struct PeerRegistry {
    /// Sorted by address; fixed after construction
    links: Vec<Arc<PeerLink>>,
    index: HashMap<String, usize>,
    transport: Arc<dyn PeerTransport>,
    config: DiscoveryConfig,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<PeerEvent>>>,
    next_session: AtomicU64,
}

impl PeerRegistry {
    /// Build the registry with one Unreachable link per address
    pub fn new<I, S>(addresses: I, transport: Arc<dyn PeerTransport>, config: DiscoveryConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let mut registry = Self {
            links: Vec::new(),
            index: HashMap::new(),
            transport,
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            next_session: AtomicU64::new(1),
        };

        for address in addresses {
            registry.add_peer(address);
        }

        registry
    }

    /// Register a new link in the Unreachable state. Duplicates are ignored.
    fn add_peer(&mut self, address: impl Into<String>) {
        let address = address.into();
        match self
            .links
            .binary_search_by(|link| link.address().cmp(address.as_str()))
        {
            Ok(_) => warn!(peer = %address, "Duplicate peer address ignored"),
            Err(pos) => {
                debug!(peer = %address, "Peer registered");
                self.links.insert(pos, Arc::new(PeerLink::new(address)));
                self.index = self
                    .links
                    .iter()
                    .enumerate()
                    .map(|(i, link)| (link.address().to_string(), i))
                    .collect();
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<Arc<PeerLink>> {
        self.index.get(address).map(|&i| self.links[i].clone())
    }

    /// Configured addresses, sorted
    pub fn addresses(&self) -> Vec<String> {
        self.links.iter().map(|l| l.address().to_string()).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.links.len()
    }

    pub fn reachable_count(&self) -> usize {
        self.links.iter().filter(|l| l.is_reachable()).count()
    }

    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.links.iter().map(|l| l.snapshot()).collect()
    }

    /// Install `callback` on every link
    pub fn set_failure_callback(&self, callback: PeerFailureCallback) {
        for link in &self.links {
            link.set_failure_callback(callback.clone());
        }
    }

    /// Hand the connection event stream to the discovery loop (once)
    pub fn take_events(&self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    // ─────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────

    /// One discovery tick
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut unreachable = Vec::new();

        for link in &self.links {
            if !link.is_reachable() {
                unreachable.push(link.clone());
                continue;
            }

            if link.pending_probes() >= self.config.failure_threshold {
                if link.demote("no reply to liveness probes") {
                    report.demoted.push(link.address().to_string());
                }
                continue;
            }

            match link.send(ForwardRequest::ping()) {
                Ok(()) => {
                    link.record_probe();
                    report.pinged.push(link.address().to_string());
                }
                // A stalled writer never answers either
                Err(e @ Error::PeerBackpressure { .. }) => {
                    link.record_probe();
                    debug!(peer = %link.address(), error = %e, "Ping not sent");
                }
                Err(e) => debug!(peer = %link.address(), error = %e, "Ping not sent"),
            }
        }

        let attempts = unreachable.iter().map(|link| self.dial(link));
        let results = join_all(attempts).await;

        for (link, result) in unreachable.iter().zip(results) {
            match result {
                Ok(()) => report.connected.push(link.address().to_string()),
                Err(e) => {
                    if self.config.debug {
                        debug!(peer = %link.address(), error = %e, "Unable to dial peer");
                    } else {
                        trace!(peer = %link.address(), error = %e, "Unable to dial peer");
                    }
                    report.failed.push(link.address().to_string());
                }
            }
        }

        report
    }

    /// Connect one link and announce this node with REGISTER
    async fn dial(&self, link: &PeerLink) -> Result<()> {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let connect = self
            .transport
            .connect(link.address(), session, self.events_tx.clone());

        let outbound = tokio::time::timeout(self.config.dial_timeout, connect)
            .await
            .map_err(|_| Error::DialTimeout {
                address: link.address().to_string(),
                timeout_ms: self.config.dial_timeout.as_millis() as u64,
            })??;

        link.mark_reachable(outbound, session);
        link.send(ForwardRequest::register())
    }

    /// Apply an event from a connection task
    pub fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::LoadReport {
                address,
                session,
                report,
            } => {
                if let Some(link) = self.get(&address) {
                    if !link.record_report(session, report.tasks) {
                        trace!(peer = %address, session, "Stale load report dropped");
                    }
                }
            }
            PeerEvent::Disconnected {
                address,
                session,
                reason,
            } => {
                if let Some(link) = self.get(&address) {
                    link.demote_session(session, &reason);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Selection
    // ─────────────────────────────────────────────────────────────

    /// Reachable peer with the strictly smallest cached depth for `task`
    ///
    /// Peers are scanned in address order, so ties go to the lowest
    /// address. Reachable peers without an entry for `task` are skipped.
    pub fn select_least_loaded(&self, task: &str) -> Result<Arc<PeerLink>> {
        let mut best: Option<(&Arc<PeerLink>, usize)> = None;
        let mut reachable = 0usize;

        for link in &self.links {
            if !link.is_reachable() {
                continue;
            }
            reachable += 1;

            let Some(length) = link.load_for(task) else {
                trace!(peer = %link.address(), task, "Peer has no load entry for task");
                continue;
            };

            if best.map_or(true, |(_, best_len)| length < best_len) {
                best = Some((link, length));
            }
        }

        match best {
            Some((link, _)) => Ok(link.clone()),
            None if reachable == 0 => Err(Error::NoPeerAvailable),
            None => Err(Error::TaskUnknownToPeers {
                task: task.to_string(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
