//! Two nodes talking over loopback TCP

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bucketmesh::bucket::BucketRegistry;
use bucketmesh::config::{BucketSettings, FillSettings, OverflowPolicy};
use bucketmesh::peer::{DiscoveryConfig, PeerRegistry, TcpTransport};
use bucketmesh::server::PeerServer;
use bucketmesh::{Error, Orchestrator, OrchestratorOptions};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TestNode {
    node: Arc<Orchestrator>,
    addr: SocketAddr,
    running: JoinHandle<Error>,
}

async fn spawn_node(capacity: usize, peers: &[SocketAddr], policy: OverflowPolicy) -> TestNode {
    let buckets = Arc::new(BucketRegistry::from_settings(&[BucketSettings {
        name: "resize".into(),
        capacity,
    }]));

    let mut server = PeerServer::new("127.0.0.1:0", buckets.clone());
    let addr = server.bind().await.unwrap();

    let registry = Arc::new(PeerRegistry::new(
        peers.iter().map(|p| p.to_string()),
        Arc::new(TcpTransport::new(16)),
        DiscoveryConfig {
            dial_timeout: Duration::from_millis(200),
            failure_threshold: 3,
            debug: true,
        },
    ));

    let options = OrchestratorOptions {
        discovery_interval: Duration::from_millis(50),
        fill: FillSettings {
            overflow_policy: policy,
            forward_honors_cancel: true,
        },
    };

    let node = Arc::new(Orchestrator::new(buckets, registry, Box::new(server), options));
    let running = {
        let node = node.clone();
        tokio::spawn(async move { node.start().await })
    };

    TestNode { node, addr, running }
}

/// Poll `check` every 10ms for up to 3s
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn shutdown(node: TestNode) {
    node.node.stop();
    let cause = tokio::time::timeout(Duration::from_secs(1), node.running)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(cause, Error::Stopped));
}

#[tokio::test]
async fn test_overflow_lands_on_sibling() {
    let sibling = spawn_node(8, &[], OverflowPolicy::ReportFull).await;
    let origin = spawn_node(1, &[sibling.addr], OverflowPolicy::ReportFull).await;

    let link = origin.node.peers().get(&sibling.addr.to_string()).unwrap();
    assert!(eventually(|| link.load_for("resize").is_some()).await);

    let cancel = CancellationToken::new();
    origin.node.fill(&cancel, "resize", "p1", json!({ "n": 1 })).await.unwrap();
    let err = origin
        .node
        .fill(&cancel, "resize", "p1", json!({ "n": 2 }))
        .await
        .unwrap_err();
    assert!(err.is_queue_full());

    let remote = sibling.node.get_bucket("resize").unwrap();
    assert!(eventually(|| remote.depth() == 1).await);

    // Cached sibling load follows on a later ping
    assert!(eventually(|| link.load_for("resize") == Some(1)).await);

    let item = remote.try_take().unwrap();
    assert_eq!(item.producer_id, "p1");
    assert_eq!(item.data, json!({ "n": 2 }));

    shutdown(origin).await;
    shutdown(sibling).await;
}

#[tokio::test]
async fn test_absorb_policy_over_tcp() {
    let sibling = spawn_node(8, &[], OverflowPolicy::Absorb).await;
    let origin = spawn_node(1, &[sibling.addr], OverflowPolicy::Absorb).await;

    let link = origin.node.peers().get(&sibling.addr.to_string()).unwrap();
    assert!(eventually(|| link.load_for("resize").is_some()).await);

    let cancel = CancellationToken::new();
    for n in 0..3 {
        origin.node.fill(&cancel, "resize", "p", json!(n)).await.unwrap();
    }

    let remote = sibling.node.get_bucket("resize").unwrap();
    assert!(eventually(|| remote.depth() == 2).await);

    shutdown(origin).await;
    shutdown(sibling).await;
}

#[tokio::test]
async fn test_stopped_sibling_becomes_unreachable() {
    let sibling = spawn_node(8, &[], OverflowPolicy::ReportFull).await;
    let sibling_addr = sibling.addr.to_string();
    let origin = spawn_node(1, &[sibling.addr], OverflowPolicy::ReportFull).await;

    let link = origin.node.peers().get(&sibling_addr).unwrap();
    assert!(eventually(|| link.is_reachable()).await);

    shutdown(sibling).await;
    assert!(eventually(|| !link.is_reachable()).await);

    let cancel = CancellationToken::new();
    origin.node.fill(&cancel, "resize", "p", json!(1)).await.unwrap();
    let err = origin
        .node
        .fill(&cancel, "resize", "p", json!(2))
        .await
        .unwrap_err();
    assert!(err.is_peer_unavailable());

    shutdown(origin).await;
}

#[tokio::test]
async fn test_unreachable_peer_does_not_block_node() {
    // Bind then drop to get a port nobody listens on
    let vacant = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let origin = spawn_node(1, &[vacant], OverflowPolicy::ReportFull).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(origin.node.peers().reachable_count(), 0);

    let cancel = CancellationToken::new();
    origin.node.fill(&cancel, "resize", "p", json!(1)).await.unwrap();

    shutdown(origin).await;
}
