//! Client side of the query protocol, one connection per operation.
//!
//! Used by tooling and tests; a DataNode itself only ever acts as a client
//! when forwarding a STORE or pinging the coordinator.

use std::io;

use bytes::Bytes;
use tokio::io::AsyncReadExt;

use clusterdfs_core::protocol::{
    BlockId, CodingRequest, PeerAddr, Request, ResponseHeader, RetrieveRequest, StoreRequest,
};
use clusterdfs_core::wire::{self, FrameKind, WireError};
use clusterdfs_core::{CodingError, CodingOperation};

use crate::connection::Connection;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: PeerAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Coding(#[from] CodingError),

    /// The node answered with an ERROR header.
    #[error("datanode error: {0}")]
    Remote(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Result of a CODING request.
#[derive(Debug)]
pub enum CodingReply {
    /// Local operation finished.
    Done(ResponseHeader),
    /// Buffers of a stream operation, in order.
    Stream(Vec<Bytes>),
}

#[derive(Debug, Clone)]
pub struct DataNodeClient {
    addr: PeerAddr,
}

impl DataNodeClient {
    pub fn new(addr: impl Into<PeerAddr>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    async fn connect(&self) -> Result<Connection, ClientError> {
        Connection::connect(self.addr.connect_target())
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr.clone(),
                source,
            })
    }

    /// Store `data` as block `id`, replicated along `fwdlist`. Returns the
    /// node's response whether it is OK or ERROR.
    pub async fn store(
        &self,
        id: &BlockId,
        data: &[u8],
        fwdlist: Vec<PeerAddr>,
    ) -> Result<ResponseHeader, ClientError> {
        let header = StoreRequest {
            id: id.clone(),
            length: data.len() as i64,
            fwdlist: (!fwdlist.is_empty()).then_some(fwdlist),
        };
        self.send_store(header, data).await
    }

    /// Send a STORE header as given followed by `body`, even when the two
    /// disagree on the length.
    pub async fn send_store(
        &self,
        header: StoreRequest,
        body: &[u8],
    ) -> Result<ResponseHeader, ClientError> {
        let mut conn = self.connect().await?;
        conn.send(&Request::Store(header)).await?;
        conn.write_raw(body).await?;
        conn.flush().await?;
        let response = conn.recv().await?;
        conn.close().await;
        Ok(response)
    }

    /// Fetch `length` bytes at `offset`; both default to the whole block.
    pub async fn retrieve(
        &self,
        id: &BlockId,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> Result<Bytes, ClientError> {
        let mut conn = self.connect().await?;
        conn.send(&Request::Retrieve(RetrieveRequest {
            id: id.clone(),
            offset,
            length,
        }))
        .await?;

        let response: ResponseHeader = conn.recv().await?;
        if !response.is_ok() {
            return Err(ClientError::Remote(response.msg));
        }
        let length = response
            .length
            .ok_or_else(|| ClientError::Protocol("OK response without length".into()))?;

        let mut data = Vec::with_capacity(length.min(wire::MAX_FRAME_PAYLOAD as u64) as usize);
        conn.body(length).read_to_end(&mut data).await?;
        if data.len() as u64 != length {
            return Err(ClientError::Protocol(format!(
                "announced {length} bytes, received {}",
                data.len()
            )));
        }
        conn.close().await;
        Ok(Bytes::from(data))
    }

    pub async fn coding(&self, op: &CodingOperation) -> Result<CodingReply, ClientError> {
        let coding = op.serialize()?;
        self.coding_raw(coding).await
    }

    /// Send a CODING request with an arbitrary descriptor text.
    pub async fn coding_raw(&self, coding: String) -> Result<CodingReply, ClientError> {
        let mut conn = self.connect().await?;
        conn.send(&Request::Coding(CodingRequest { coding })).await?;

        let mut buffers = Vec::new();
        loop {
            let frame = conn.recv_frame().await?;
            match frame.kind {
                FrameKind::Data => buffers.push(frame.payload),
                FrameKind::End => {
                    conn.close().await;
                    return Ok(CodingReply::Stream(buffers));
                }
                FrameKind::Header => {
                    let response: ResponseHeader = wire::decode_header(&frame)?;
                    conn.close().await;
                    if !response.is_ok() {
                        return Err(ClientError::Remote(response.msg));
                    }
                    if !buffers.is_empty() {
                        return Err(ClientError::Protocol("OK header inside a data stream".into()));
                    }
                    return Ok(CodingReply::Done(response));
                }
            }
        }
    }
}
