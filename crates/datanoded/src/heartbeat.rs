//! Liveness pings to the coordinator.
//!
//! Every interval the node opens a fresh connection, sends
//! `{"op": "PING", "datanode_port": N}` followed by an empty forward list,
//! and reads one response. An exchange that takes longer than the interval
//! is abandoned. Failures are logged and retried on the next tick; they
//! never affect query serving.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use clusterdfs_core::protocol::{CoordinatorRequest, PeerAddr, ResponseHeader};
use clusterdfs_core::wire::WireError;
use clusterdfs_core::DataNodeConfig;

use crate::connection::Connection;

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("coordinator unreachable: {0}")]
    Unreachable(#[source] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("coordinator rejected ping: {0}")]
    Rejected(String),

    #[error("coordinator did not answer within {0:?}")]
    TimedOut(Duration),
}

/// Counters for observing the loop from outside.
#[derive(Debug, Default)]
pub struct HeartbeatStatus {
    attempts: AtomicU64,
    acknowledged: AtomicU64,
    failures: AtomicU64,
}

impl HeartbeatStatus {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

pub struct HeartbeatLoop {
    coordinator: String,
    interval: Duration,
    ping: CoordinatorRequest,
    status: Arc<HeartbeatStatus>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatLoop {
    /// `datanode_port` is the port the query listener actually bound.
    pub fn new(
        config: &DataNodeConfig,
        datanode_port: u16,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            coordinator: config.coordinator_addr(),
            interval: config.ping_interval(),
            ping: CoordinatorRequest::Ping { datanode_port },
            status: Arc::new(HeartbeatStatus::default()),
            shutdown,
        }
    }

    pub fn status(&self) -> Arc<HeartbeatStatus> {
        self.status.clone()
    }

    pub async fn run(mut self) {
        tracing::info!(
            coordinator = %self.coordinator,
            interval_secs = self.interval.as_secs(),
            "heartbeat starting"
        );

        loop {
            self.status.attempts.fetch_add(1, Ordering::Relaxed);
            tokio::select! {
                _ = self.shutdown.recv() => break,
                result = ping_within(self.interval, &self.coordinator, &self.ping) => match result {
                    Ok(()) => {
                        self.status.acknowledged.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(coordinator = %self.coordinator, "ping acknowledged");
                    }
                    Err(e) => {
                        self.status.failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(coordinator = %self.coordinator, error = %e, "ping failed");
                    }
                },
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("heartbeat shutting down");
    }
}

async fn ping_within(
    limit: Duration,
    coordinator: &str,
    ping: &CoordinatorRequest,
) -> Result<(), HeartbeatError> {
    tokio::time::timeout(limit, ping_once(coordinator, ping))
        .await
        .map_err(|_| HeartbeatError::TimedOut(limit))?
}

async fn ping_once(coordinator: &str, ping: &CoordinatorRequest) -> Result<(), HeartbeatError> {
    let mut conn = Connection::connect(coordinator)
        .await
        .map_err(HeartbeatError::Unreachable)?;
    conn.send(ping).await?;
    conn.send(&Vec::<PeerAddr>::new()).await?;
    let response: ResponseHeader = conn.recv().await?;
    conn.close().await;

    if response.is_ok() {
        Ok(())
    } else {
        Err(HeartbeatError::Rejected(response.msg))
    }
}
