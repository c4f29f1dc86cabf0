//! Peer transport — outbound TCP connections to sibling nodes
//!
//! Each connection gets a dedicated writer task draining a bounded
//! channel and a reader task turning [`LoadReport`] replies into
//! [`PeerEvent`]s for the registry.

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{read_frame, write_frame, ForwardRequest, LoadReport};

// ─────────────────────────────────────────────────────────────────
// Events emitted by connections to the registry
// ─────────────────────────────────────────────────────────────────

/// Events from peer connections
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The peer answered REGISTER or PING with its load
    LoadReport {
        address: String,
        session: u64,
        report: LoadReport,
    },

    /// The connection was closed or failed
    Disconnected {
        address: String,
        session: u64,
        reason: String,
    },
}

/// Opens connections to peers
///
/// `session` identifies the connection in the events it emits, so the
/// registry can ignore events from a connection it already replaced.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        session: u64,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<mpsc::Sender<ForwardRequest>>;
}

// ─────────────────────────────────────────────────────────────────
// TCP transport
// ─────────────────────────────────────────────────────────────────

/// Length-prefixed JSON over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    outbound_queue_size: usize,
}

impl TcpTransport {
    pub fn new(outbound_queue_size: usize) -> Self {
        Self {
            outbound_queue_size: outbound_queue_size.max(1),
        }
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn connect(
        &self,
        address: &str,
        session: u64,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<mpsc::Sender<ForwardRequest>> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| Error::dial_failed(address, e.to_string()))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (write_tx, write_rx) = mpsc::channel(self.outbound_queue_size);

        let reader = tokio::spawn(read_loop(address.to_string(), session, read_half, events));
        tokio::spawn(write_loop(address.to_string(), write_half, write_rx, reader));

        Ok(write_tx)
    }
}

/// Reads load reports until EOF or error, then reports the disconnect
async fn read_loop(
    address: String,
    session: u64,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<PeerEvent>,
) {
    let reason = loop {
        match read_frame::<LoadReport, _>(&mut reader).await {
            Ok(Some(report)) => {
                trace!(peer = %address, tasks = report.tasks.len(), "Load report received");
                let event = PeerEvent::LoadReport {
                    address: address.clone(),
                    session,
                    report,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Ok(None) => break "Connection closed".to_string(),
            Err(e) => {
                debug!(peer = %address, error = %e, "Peer read error");
                break e.to_string();
            }
        }
    };

    let _ = events
        .send(PeerEvent::Disconnected {
            address,
            session,
            reason,
        })
        .await;
}

/// Drains the outbound channel; stops the reader once the link is dropped
async fn write_loop(
    address: String,
    mut writer: OwnedWriteHalf,
    mut write_rx: mpsc::Receiver<ForwardRequest>,
    reader: JoinHandle<()>,
) {
    while let Some(req) = write_rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &req).await {
            debug!(peer = %address, command = %req.command, error = %e, "Peer write error");
            break;
        }
    }
    reader.abort();
}

// ─────────────────────────────────────────────────────────────────
// Test transport
// ─────────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaskLoadInfo;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_transport_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req: ForwardRequest = read_frame(&mut stream).await.unwrap().unwrap();
            let report = LoadReport {
                tasks: vec![TaskLoadInfo { key: "resize".into(), length: 1 }],
            };
            write_frame(&mut stream, &report).await.unwrap();
            req
        });

        let (events_tx, mut events_rx) = mpsc::channel(8);
        let transport = TcpTransport::new(4);
        let outbound = transport.connect(&addr, 7, events_tx).await.unwrap();
        outbound.send(ForwardRequest::register()).await.unwrap();

        assert_eq!(server.await.unwrap(), ForwardRequest::register());

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            PeerEvent::LoadReport { session, report, .. } => {
                assert_eq!(session, 7);
                assert_eq!(report.length_of("resize"), Some(1));
            }
            other => panic!("Expected LoadReport, got {:?}", other),
        }

        // Server task dropped its stream
        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, PeerEvent::Disconnected { session: 7, .. }));
    }

    #[tokio::test]
    async fn test_tcp_transport_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (events_tx, _events_rx) = mpsc::channel(8);
        let err = TcpTransport::new(4).connect(&addr, 1, events_tx).await.unwrap_err();
        assert!(matches!(err, Error::DialFailed { .. }));
    }
}
