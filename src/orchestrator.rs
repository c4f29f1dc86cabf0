//! Node orchestrator
//!
//! Composes the bucket registry, the peer registry and the inbound
//! listener. `start` runs discovery and the listener until one of them
//! ends the node; `fill` is the producer entry point that spills work to
//! the least-loaded sibling when the local bucket is full.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bucket::{BucketRegistry, Priority, TaskItem, TaskQueue};
use crate::config::{FillSettings, NodeConfig, OverflowPolicy};
use crate::error::{Error, Result};
use crate::peer::{DiscoveryConfig, PeerEvent, PeerRegistry, TcpTransport};
use crate::protocol::ForwardRequest;
use crate::server::{InboundListener, PeerServer};

/// Runtime knobs of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Time between discovery ticks
    pub discovery_interval: Duration,
    pub fill: FillSettings,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(2),
            fill: FillSettings::default(),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            discovery_interval: config.peer.discovery_interval(),
            fill: config.fill.clone(),
        }
    }
}

/// One node: local buckets, siblings and the inbound listener
pub struct Orchestrator {
    buckets: Arc<BucketRegistry>,
    peers: Arc<PeerRegistry>,
    listener: Mutex<Option<Box<dyn InboundListener>>>,
    options: OrchestratorOptions,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        buckets: Arc<BucketRegistry>,
        peers: Arc<PeerRegistry>,
        listener: Box<dyn InboundListener>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            buckets,
            peers,
            listener: Mutex::new(Some(listener)),
            options,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Wire a TCP node from configuration
    pub fn from_config(config: &NodeConfig) -> Self {
        let buckets = Arc::new(BucketRegistry::from_settings(&config.buckets));
        let transport = Arc::new(TcpTransport::new(config.peer.outbound_queue_size));
        let peers = Arc::new(PeerRegistry::new(
            config.peer.addresses.iter().cloned(),
            transport,
            DiscoveryConfig::from_settings(&config.peer, config.node.debug),
        ));
        let listener = PeerServer::on_port(config.peer.listen_port, buckets.clone());

        Self::new(
            buckets,
            peers,
            Box::new(listener),
            OrchestratorOptions::from_config(config),
        )
    }

    pub fn buckets(&self) -> &Arc<BucketRegistry> {
        &self.buckets
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// Local queue for `task`, if this node has one
    pub fn get_bucket(&self, task: &str) -> Option<Arc<dyn TaskQueue>> {
        self.buckets.get(task)
    }

    /// Install `callback` on every peer link; invoked when a send fails
    pub fn set_peer_failure_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &ForwardRequest, &Error) + Send + Sync + 'static,
    {
        self.peers.set_failure_callback(Arc::new(callback));
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Run discovery and the listener until the node ends
    ///
    /// Always returns the terminal cause: [`Error::Stopped`] after
    /// [`stop`](Self::stop), [`Error::ListenerFatal`] if the listener
    /// fails or exits.
    pub async fn start(&self) -> Error {
        if self.started.swap(true, Ordering::SeqCst) {
            return Error::AlreadyStarted;
        }
        if self.shutdown.is_cancelled() {
            return Error::Stopped;
        }

        let listener = self.listener.lock().take();
        let events = self.peers.take_events();
        let (Some(listener), Some(events)) = (listener, events) else {
            return Error::Internal("node components already consumed".into());
        };

        info!(
            buckets = self.buckets.len(),
            peers = self.peers.peer_count(),
            interval_ms = self.options.discovery_interval.as_millis() as u64,
            "Node starting"
        );

        let halt = self.shutdown.child_token();
        let mut listener_task = tokio::spawn(listener.run(halt.clone()));
        let discovery_task = tokio::spawn(discovery_loop(
            self.peers.clone(),
            events,
            self.options.discovery_interval,
            halt.clone(),
        ));

        // The listener also returns Ok once stop() fires; a requested stop wins
        let cause = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Error::Stopped,
            result = &mut listener_task => match result {
                _ if self.shutdown.is_cancelled() => Error::Stopped,
                Ok(Ok(())) => Error::ListenerFatal {
                    message: "listener exited".into(),
                },
                Ok(Err(e @ Error::ListenerFatal { .. })) => e,
                Ok(Err(e)) => Error::ListenerFatal {
                    message: e.to_string(),
                },
                Err(e) => Error::ListenerFatal {
                    message: e.to_string(),
                },
            },
        };

        halt.cancel();
        listener_task.abort();
        if let Err(e) = discovery_task.await {
            warn!(error = %e, "Discovery task ended abnormally");
        }

        info!(cause = %cause, "Node stopped");
        cause
    }

    /// Ask `start` to unwind; safe to call any number of times
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Stop requested");
            self.shutdown.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ─────────────────────────────────────────────────────────────
    // Fill
    // ─────────────────────────────────────────────────────────────

    /// Queue work for `task`, spilling to a sibling when the local bucket is full
    ///
    /// With [`OverflowPolicy::ReportFull`] the local `QueueFull` error is
    /// returned even when the work was forwarded. With
    /// [`OverflowPolicy::Absorb`] a successful forward returns `Ok`.
    pub async fn fill(
        &self,
        cancel: &CancellationToken,
        task: &str,
        producer_id: &str,
        data: Value,
    ) -> Result<()> {
        let queue = self
            .buckets
            .get(task)
            .ok_or_else(|| Error::bucket_not_found(task))?;

        let item = TaskItem::new(producer_id, data.clone());
        let full = match queue.enqueue(Priority::Immediate, item, cancel).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_queue_full() => e,
            Err(e) => return Err(e),
        };

        if self.options.fill.forward_honors_cancel && cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let peer = match self.peers.select_least_loaded(task) {
            Ok(peer) => peer,
            Err(e) => {
                debug!(task, error = %e, "No peer to take overflow");
                return Err(Error::overflow_failed(task, e));
            }
        };

        let forwarded = ForwardRequest::task(task, producer_id, &data).and_then(|req| peer.send(req));
        match (forwarded, self.options.fill.overflow_policy) {
            (Ok(()), OverflowPolicy::ReportFull) => {
                debug!(task, peer = %peer.address(), "Overflow forwarded");
                Err(full)
            }
            (Ok(()), OverflowPolicy::Absorb) => {
                debug!(task, peer = %peer.address(), "Overflow absorbed by peer");
                Ok(())
            }
            (Err(e), OverflowPolicy::ReportFull) => {
                warn!(task, peer = %peer.address(), error = %e, "Overflow forward failed");
                Err(full)
            }
            (Err(e), OverflowPolicy::Absorb) => Err(Error::overflow_failed(task, e)),
        }
    }
}

/// Tick discovery and apply connection events until `halt` fires
async fn discovery_loop(
    peers: Arc<PeerRegistry>,
    mut events: mpsc::Receiver<PeerEvent>,
    interval: Duration,
    halt: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = halt.cancelled() => break,
            _ = ticker.tick() => {
                let report = tokio::select! {
                    _ = halt.cancelled() => break,
                    report = peers.reconcile() => report,
                };
                trace!(
                    connected = report.connected.len(),
                    failed = report.failed.len(),
                    pinged = report.pinged.len(),
                    demoted = report.demoted.len(),
                    "Discovery tick"
                );
            }
            Some(event) = events.recv() => peers.handle_event(event),
        }
    }

    debug!("Discovery loop stopped");
}
