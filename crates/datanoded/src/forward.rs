//! Outbound leg of a replicated STORE.
//!
//! Opened once the local write is ready. Carries the rewritten header and
//! then every body chunk, in the order received, to the next DataNode in
//! the chain. The downstream response is read after the whole body has
//! been relayed.

use std::io;

use clusterdfs_core::protocol::{PeerAddr, Request, ResponseHeader, StoreRequest};
use clusterdfs_core::wire::WireError;

use crate::connection::Connection;

pub struct ReplicationForwarder {
    peer: PeerAddr,
    conn: Connection,
    relayed: u64,
}

impl ReplicationForwarder {
    /// Connect to `peer` and send it the STORE header for the rest of the
    /// chain.
    pub async fn open(peer: &PeerAddr, header: StoreRequest) -> Result<Self, WireError> {
        let mut conn = Connection::connect(peer.connect_target()).await?;
        conn.send(&Request::Store(header)).await?;
        tracing::debug!(peer = %peer, "replica connection opened");
        Ok(Self {
            peer: peer.clone(),
            conn,
            relayed: 0,
        })
    }

    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.conn.write_raw(chunk).await?;
        self.relayed += chunk.len() as u64;
        Ok(())
    }

    /// Push any buffered body bytes to the peer.
    pub async fn finish_body(&mut self) -> io::Result<()> {
        self.conn.flush().await
    }

    /// The downstream node's answer for the whole remaining chain.
    pub async fn recv_response(&mut self) -> Result<ResponseHeader, WireError> {
        self.conn.recv().await
    }

    pub async fn terminate(self) {
        tracing::trace!(peer = %self.peer, relayed = self.relayed, "replica connection closed");
        self.conn.close().await;
    }
}
