//! Inbound peer listener
//!
//! Sibling nodes dial this listener to register, probe our load and hand
//! over overflow work. REGISTER and PING are answered with the current
//! [`LoadReport`]; TASK is enqueued locally and never forwarded again,
//! so overflow cannot bounce between nodes.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bucket::{BucketRegistry, Priority, TaskItem};
use crate::error::{Error, Result};
use crate::protocol::{read_frame, write_frame, Command, ForwardRequest};

/// Long-running inbound side of a node
///
/// `run` returns `Ok(())` once `shutdown` fires; any error it returns is
/// terminal for the node.
#[async_trait]
pub trait InboundListener: Send {
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// TCP listener speaking the sibling protocol
pub struct PeerServer {
    bind_addr: String,
    listener: Option<TcpListener>,
    buckets: Arc<BucketRegistry>,
}

impl PeerServer {
    /// Listener for `bind_addr`; the socket is bound lazily by `run`
    pub fn new(bind_addr: impl Into<String>, buckets: Arc<BucketRegistry>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            listener: None,
            buckets,
        }
    }

    /// Listener on every interface at `port`
    pub fn on_port(port: u16, buckets: Arc<BucketRegistry>) -> Self {
        Self::new(format!("0.0.0.0:{}", port), buckets)
    }

    /// Bind now and return the local address (useful with port 0)
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return listener.local_addr().map_err(Error::from);
        }

        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| Error::ListenerFatal {
                message: format!("bind {}: {}", self.bind_addr, e),
            })?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(addr)
    }
}

#[async_trait]
impl InboundListener for PeerServer {
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut server = *self;
        server.bind().await?;
        let Some(listener) = server.listener.take() else {
            return Err(Error::Internal("listener not bound".into()));
        };

        let addr = listener.local_addr()?;
        info!(addr = %addr, "Peer listener started");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(addr = %addr, "Peer listener stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, remote) = accepted.map_err(|e| Error::ListenerFatal {
                message: format!("accept on {}: {}", addr, e),
            })?;
            debug!(remote = %remote, "Inbound peer connection");

            let buckets = server.buckets.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    result = serve_connection(stream, buckets, &shutdown) => {
                        if let Err(e) = result {
                            debug!(remote = %remote, error = %e, "Inbound connection closed");
                        }
                    }
                }
            });
        }
    }
}

/// Answer one sibling until it hangs up
async fn serve_connection(
    mut stream: TcpStream,
    buckets: Arc<BucketRegistry>,
    shutdown: &CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true)?;

    while let Some(req) = read_frame::<ForwardRequest, _>(&mut stream).await? {
        match req.command {
            Command::Register | Command::Ping => {
                write_frame(&mut stream, &buckets.load_report()).await?;
            }
            Command::Task => accept_task(&buckets, req, shutdown).await,
        }
    }

    Ok(())
}

/// Enqueue forwarded work locally; failures stay local
async fn accept_task(buckets: &BucketRegistry, req: ForwardRequest, shutdown: &CancellationToken) {
    let Some(queue) = buckets.get(&req.group) else {
        warn!(task = %req.group, producer = %req.producer_id, "Forwarded task has no local bucket");
        return;
    };

    let data = match req.payload_value() {
        Ok(data) => data,
        Err(e) => {
            warn!(task = %req.group, error = %e, "Forwarded task payload rejected");
            return;
        }
    };

    let item = TaskItem::new(req.producer_id, data);
    match queue.enqueue(Priority::Immediate, item, shutdown).await {
        Ok(()) => debug!(task = %req.group, depth = queue.depth(), "Forwarded task accepted"),
        Err(e) if e.is_queue_full() => {
            warn!(task = %req.group, "Forwarded task dropped, bucket full")
        }
        Err(e) => warn!(task = %req.group, error = %e, "Forwarded task dropped"),
    }
}
