//! DataNode lifecycle: bind, serve, stop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use clusterdfs_core::protocol::PeerAddr;
use clusterdfs_core::DataNodeConfig;
use clusterdfs_services::BlockStore;

use crate::connection::Connection;
use crate::heartbeat::{HeartbeatLoop, HeartbeatStatus};
use crate::query::{NodeContext, QueryHandler};

/// A bound but not yet serving DataNode.
pub struct DataNode {
    ctx: Arc<NodeContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl DataNode {
    pub async fn bind(config: DataNodeConfig) -> Result<Self> {
        config.validate().context("invalid datanode config")?;
        let config = Arc::new(config);

        let store = BlockStore::new(&config.storage.data_dir)?;
        tracing::info!(data_dir = %store.root().display(), "block store ready");

        let listen = config.listen_addr();
        let listener = TcpListener::bind(&listen)
            .await
            .with_context(|| format!("failed to bind query listener on {listen}"))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            ctx: Arc::new(NodeContext::new(config, store)),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the accept loop and, unless isolated, the heartbeat.
    pub fn start(self) -> RunningNode {
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = self.ctx.config.clone();

        let heartbeat = if config.coordinator.isolated {
            tracing::info!("isolated mode, heartbeat disabled");
            None
        } else {
            let heartbeat = HeartbeatLoop::new(&config, self.local_addr.port(), shutdown_tx.subscribe());
            let status = heartbeat.status();
            Some((tokio::spawn(heartbeat.run()), status))
        };

        tracing::info!(addr = %self.local_addr, "datanode serving");
        let accept = tokio::spawn(accept_loop(
            self.listener,
            self.ctx.clone(),
            shutdown_tx.subscribe(),
        ));

        RunningNode {
            local_addr: self.local_addr,
            ctx: self.ctx,
            shutdown_tx,
            accept,
            heartbeat,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<NodeContext>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("accept loop shutting down");
                return;
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };
                let conn = match Connection::new(stream) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "connection setup failed");
                        continue;
                    }
                };
                tracing::trace!(peer = %peer, "connection accepted");

                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = QueryHandler::new(conn, ctx).run().await {
                        tracing::debug!(peer = %peer, error = %e, "connection dropped");
                    }
                });
            }
        }
    }
}

/// Handle to a serving DataNode.
pub struct RunningNode {
    local_addr: SocketAddr,
    ctx: Arc<NodeContext>,
    shutdown_tx: broadcast::Sender<()>,
    accept: JoinHandle<()>,
    heartbeat: Option<(JoinHandle<()>, Arc<HeartbeatStatus>)>,
}

impl RunningNode {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address other nodes use to reach this one in a forward list.
    pub fn peer_addr(&self) -> PeerAddr {
        PeerAddr::from(self.local_addr)
    }

    pub fn store(&self) -> &BlockStore {
        &self.ctx.store
    }

    /// `None` when running isolated.
    pub fn heartbeat_status(&self) -> Option<&HeartbeatStatus> {
        self.heartbeat.as_ref().map(|(_, status)| status.as_ref())
    }

    /// Stop accepting and stop the heartbeat. Queries already being served
    /// run to completion on their own.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.accept.await.context("accept loop panicked")?;
        if let Some((task, _)) = self.heartbeat {
            task.await.context("heartbeat panicked")?;
        }
        tracing::info!(addr = %self.local_addr, "datanode stopped");
        Ok(())
    }
}
