//! DataNode integration test harness.
//!
//! Every test starts its own nodes on OS-assigned loopback ports with a
//! private data directory, so tests can run in parallel:
//!
//!   cargo test --test integration
//!
//! Coordinators and misbehaving replicas are faked in-process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rand::RngCore;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use clusterdfs_core::protocol::{
    BlockId, CoordinatorRequest, PeerAddr, Request, ResponseHeader, StoreRequest,
};
use clusterdfs_core::DataNodeConfig;
use datanoded::connection::Connection;
use datanoded::{DataNode, DataNodeClient, RunningNode};

mod coding;
mod queries;

// ── Harness ───────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn temp_dir(tag: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "clusterdfs-it-{}-{}-{}",
        tag,
        std::process::id(),
        n
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut v = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut v);
    v
}

pub fn id(s: &str) -> BlockId {
    BlockId::new(s).unwrap()
}

/// A port nothing is listening on.
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub struct TestNode {
    pub node: RunningNode,
    pub client: DataNodeClient,
    pub dir: PathBuf,
}

impl TestNode {
    pub async fn start(config: DataNodeConfig) -> Result<Self> {
        let dir = config.storage.data_dir.clone();
        let node = DataNode::bind(config).await?.start();
        let client = DataNodeClient::new(node.local_addr());
        Ok(Self { node, client, dir })
    }

    pub async fn isolated(tag: &str) -> Self {
        Self::start(DataNodeConfig::isolated(temp_dir(tag)))
            .await
            .unwrap()
    }

    /// Node pinging the coordinator at `coordinator` every second.
    pub async fn with_coordinator(tag: &str, coordinator: SocketAddr) -> Self {
        let mut config = DataNodeConfig::isolated(temp_dir(tag));
        config.coordinator.isolated = false;
        config.coordinator.host = coordinator.ip().to_string();
        config.coordinator.port = coordinator.port();
        config.coordinator.ping_interval_secs = 1;
        Self::start(config).await.unwrap()
    }

    pub fn addr(&self) -> PeerAddr {
        self.node.peer_addr()
    }

    pub fn on_disk(&self, block: &str) -> Option<Vec<u8>> {
        std::fs::read(self.dir.join(block)).ok()
    }

    pub async fn shutdown(self) {
        self.node.stop().await.unwrap();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Accepts coordinator pings and records the advertised ports.
pub struct FakeCoordinator {
    pub addr: SocketAddr,
    pub pings: Arc<Mutex<Vec<u16>>>,
    task: JoinHandle<()>,
}

impl FakeCoordinator {
    pub async fn start(reply: ResponseHeader) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pings = Arc::new(Mutex::new(Vec::new()));

        let recorded = pings.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let mut conn = Connection::new(stream).unwrap();
                let ping: CoordinatorRequest = match conn.recv().await {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                let marker: Vec<PeerAddr> = match conn.recv().await {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                assert!(marker.is_empty(), "ping followed by non-empty list");
                let CoordinatorRequest::Ping { datanode_port } = ping;
                recorded.lock().unwrap().push(datanode_port);
                let _ = conn.send(&reply).await;
                conn.close().await;
            }
        });

        Self { addr, pings, task }
    }

    pub fn ping_count(&self) -> usize {
        self.pings.lock().unwrap().len()
    }

    /// Wait until at least `n` pings arrived, up to `timeout`.
    pub async fn wait_for_pings(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.ping_count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.ping_count() >= n
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

/// Accepts coordinator connections and never answers them.
pub struct SilentCoordinator {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl SilentCoordinator {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicU64::new(0));

        let counter = accepted.clone();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::Relaxed);
                held.push(stream);
            }
        });
        Self {
            addr,
            accepted,
            task,
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

/// Replica that takes one STORE, records what it got and answers with
/// `reply` regardless of content.
pub struct FakeReplica {
    pub addr: SocketAddr,
    task: JoinHandle<(StoreRequest, Vec<u8>)>,
}

impl FakeReplica {
    pub async fn start(reply: ResponseHeader) -> Self {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream).unwrap();
            let Request::Store(header) = conn.recv::<Request>().await.unwrap() else {
                panic!("replica expected STORE");
            };
            let mut body = Vec::new();
            conn.body(header.length as u64)
                .read_to_end(&mut body)
                .await
                .unwrap();
            conn.send(&reply).await.unwrap();
            conn.close().await;
            (header, body)
        });
        Self { addr, task }
    }

    /// Replica that reads the STORE header and `n` body bytes, then drops
    /// the connection without answering.
    pub async fn dropping_after(n: usize) -> Self {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream).unwrap();
            let Request::Store(header) = conn.recv::<Request>().await.unwrap() else {
                panic!("replica expected STORE");
            };
            let mut body = vec![0u8; n];
            conn.body(n as u64).read_exact(&mut body).await.unwrap();
            drop(conn);
            (header, body)
        });
        Self { addr, task }
    }

    pub fn peer_addr(&self) -> PeerAddr {
        PeerAddr::from(self.addr)
    }

    pub async fn received(self) -> (StoreRequest, Vec<u8>) {
        self.task.await.unwrap()
    }
}
