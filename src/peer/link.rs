//! Peer link — connection state and send path for one sibling
//!
//! A link is Unreachable until a dial succeeds. While Reachable it
//! holds the bounded outbound channel of its connection; dropping that
//! channel is what demotes it again.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{ForwardRequest, TaskLoadInfo};

/// Hook invoked when sending to a peer fails: `(address, request, error)`
pub type PeerFailureCallback = Arc<dyn Fn(&str, &ForwardRequest, &Error) + Send + Sync>;

/// Mutable part of a link, guarded by the link's own lock
#[derive(Default)]
struct LinkState {
    /// Present while the peer is reachable
    outbound: Option<mpsc::Sender<ForwardRequest>>,
    /// Connection the outbound channel belongs to
    session: u64,
    /// Last load snapshot received; kept across reconnects
    load: Vec<TaskLoadInfo>,
    /// Pings sent since the last load report
    pending_probes: u32,
    connected_at: Option<Instant>,
    last_report: Option<Instant>,
}

/// Point-in-time view of a link
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub address: String,
    pub reachable: bool,
    pub load: Vec<TaskLoadInfo>,
    pub pending_probes: u32,
}

/// One configured sibling
pub struct PeerLink {
    address: String,
    state: Mutex<LinkState>,
    failure_callback: RwLock<Option<PeerFailureCallback>>,
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("address", &self.address)
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

impl PeerLink {
    /// New link in the Unreachable state
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Mutex::new(LinkState::default()),
            failure_callback: RwLock::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_reachable(&self) -> bool {
        self.state.lock().outbound.is_some()
    }

    /// Last load snapshot received from this peer
    pub fn load_info(&self) -> Vec<TaskLoadInfo> {
        self.state.lock().load.clone()
    }

    /// Cached depth for `task`, if the peer reported it
    pub fn load_for(&self, task: &str) -> Option<usize> {
        self.state
            .lock()
            .load
            .iter()
            .find(|info| info.key == task)
            .map(|info| info.length)
    }

    pub fn pending_probes(&self) -> u32 {
        self.state.lock().pending_probes
    }

    /// Time since the last load report, if any arrived
    pub fn last_report_age(&self) -> Option<std::time::Duration> {
        self.state.lock().last_report.map(|at| at.elapsed())
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        let state = self.state.lock();
        PeerSnapshot {
            address: self.address.clone(),
            reachable: state.outbound.is_some(),
            load: state.load.clone(),
            pending_probes: state.pending_probes,
        }
    }

    pub fn set_failure_callback(&self, callback: PeerFailureCallback) {
        *self.failure_callback.write() = Some(callback);
    }

    /// Dispatch without waiting. A full channel is back-pressure, a
    /// closed one means the connection is gone and demotes the link.
    pub fn send(&self, req: ForwardRequest) -> Result<()> {
        let outbound = self.state.lock().outbound.clone();
        let Some(outbound) = outbound else {
            let err = Error::PeerDisconnected {
                address: self.address.clone(),
            };
            self.notify_failure(&req, &err);
            return Err(err);
        };

        match outbound.try_send(req) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(req)) => {
                let err = Error::PeerBackpressure {
                    address: self.address.clone(),
                };
                debug!(peer = %self.address, command = %req.command, "Outbound queue full");
                self.notify_failure(&req, &err);
                Err(err)
            }
            Err(TrySendError::Closed(req)) => {
                let err = Error::PeerDisconnected {
                    address: self.address.clone(),
                };
                self.demote("outbound channel closed");
                self.notify_failure(&req, &err);
                Err(err)
            }
        }
    }

    fn notify_failure(&self, req: &ForwardRequest, err: &Error) {
        let callback = self.failure_callback.read().clone();
        if let Some(callback) = callback {
            callback(&self.address, req, err);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // State transitions (driven by the registry)
    // ─────────────────────────────────────────────────────────────

    /// Unreachable → Reachable on a successful dial
    pub(crate) fn mark_reachable(&self, outbound: mpsc::Sender<ForwardRequest>, session: u64) {
        let mut state = self.state.lock();
        state.outbound = Some(outbound);
        state.session = session;
        state.pending_probes = 0;
        state.connected_at = Some(Instant::now());
        info!(peer = %self.address, session, "Peer reachable");
    }

    /// Reachable → Unreachable
    pub(crate) fn demote(&self, reason: &str) -> bool {
        let mut state = self.state.lock();
        if state.outbound.take().is_none() {
            return false;
        }
        state.pending_probes = 0;
        let uptime = state.connected_at.take().map(|at| at.elapsed());
        info!(peer = %self.address, reason, uptime = ?uptime, "Peer unreachable");
        true
    }

    /// Demote only if `session` is still the live connection
    pub(crate) fn demote_session(&self, session: u64, reason: &str) -> bool {
        if self.state.lock().session != session {
            return false;
        }
        self.demote(reason)
    }

    pub(crate) fn record_probe(&self) {
        self.state.lock().pending_probes += 1;
    }

    /// Store a load report from connection `session`; stale sessions are ignored
    pub(crate) fn record_report(&self, session: u64, load: Vec<TaskLoadInfo>) -> bool {
        let mut state = self.state.lock();
        if state.session != session || state.outbound.is_none() {
            return false;
        }
        state.load = load;
        state.pending_probes = 0;
        state.last_report = Some(Instant::now());
        true
    }
}
