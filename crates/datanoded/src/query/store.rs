//! STORE: receive a block body, write it locally and relay it down the
//! forward chain in one pass.

use tokio::io::AsyncReadExt;

use clusterdfs_core::protocol::{messages, ResponseHeader, StoreRequest};
use clusterdfs_services::BlockWriter;

use super::error::QueryError;
use super::NodeContext;
use crate::connection::{BodyReader, Connection};
use crate::forward::ReplicationForwarder;

const CHUNK: usize = 64 * 1024;

pub(super) async fn handle(
    conn: &mut Connection,
    ctx: &NodeContext,
    req: StoreRequest,
) -> Result<ResponseHeader, QueryError> {
    if req.length <= 0 {
        // Nothing to drain: a non-positive length announces no body.
        return Err(QueryError::validation(messages::BLOCK_SIZE_NOT_POSITIVE));
    }
    let length = req.length as u64;
    let replicas = req.fwdlist.as_ref().map_or(0, Vec::len);
    tracing::info!(block = %req.id, length, replicas, "receiving block");

    let mut body = conn.body(length);
    let outcome = receive(&mut body, ctx, &req, length).await;

    if outcome.is_err() && body.limit() > 0 {
        let remaining = body.limit();
        match tokio::io::copy(&mut body, &mut tokio::io::sink()).await {
            Ok(n) => tracing::debug!(block = %req.id, drained = n, remaining, "drained unread body"),
            Err(e) => tracing::debug!(block = %req.id, error = %e, "drain stopped"),
        }
    }
    outcome
}

async fn receive(
    body: &mut BodyReader<'_>,
    ctx: &NodeContext,
    req: &StoreRequest,
    length: u64,
) -> Result<ResponseHeader, QueryError> {
    let mut local = ctx.store.open_write(&req.id).await?;

    let mut forward = match req.next_hop() {
        Some((peer, header)) => match ReplicationForwarder::open(peer, header).await {
            Ok(fwd) => Some(fwd),
            Err(e) => {
                tracing::warn!(block = %req.id, peer = %peer, error = %e, "replica unreachable");
                discard(local).await;
                return Err(QueryError::transmission(e));
            }
        },
        None => None,
    };

    let relayed = relay(body, &mut local, forward.as_mut()).await;

    // The local write is closed before anything else happens, on every path.
    let committed = match relayed {
        Ok(()) => local.close().await.map_err(QueryError::transmission),
        Err(e) => {
            discard(local).await;
            Err(e)
        }
    };

    let response = match (committed, forward.as_mut()) {
        (Err(e), _) => Err(e),
        (Ok(receipt), fwd) => {
            tracing::info!(
                block = %receipt.id,
                bytes = receipt.bytes,
                digest = receipt.digest_hex(),
                "block stored"
            );
            debug_assert_eq!(receipt.bytes, length);
            match fwd {
                None => Ok(ResponseHeader::ok(messages::BLOCK_STORED)),
                Some(fwd) => downstream_response(fwd).await,
            }
        }
    };

    if let Some(fwd) = forward {
        fwd.terminate().await;
    }
    response
}

/// Copy the body chunk by chunk to the local block and the next replica.
/// Every chunk must land in both before the next one is read.
async fn relay(
    body: &mut BodyReader<'_>,
    local: &mut BlockWriter,
    mut forward: Option<&mut ReplicationForwarder>,
) -> Result<(), QueryError> {
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = body.read(&mut buf).await.map_err(QueryError::transmission)?;
        if n == 0 {
            break;
        }
        local
            .write(&buf[..n])
            .await
            .map_err(QueryError::transmission)?;
        if let Some(fwd) = forward.as_deref_mut() {
            fwd.write(&buf[..n])
                .await
                .map_err(QueryError::transmission)?;
        }
    }

    if body.limit() > 0 {
        return Err(QueryError::transmission(format!(
            "body ended {} bytes early",
            body.limit()
        )));
    }
    if let Some(fwd) = forward {
        fwd.finish_body().await.map_err(QueryError::transmission)?;
    }
    Ok(())
}

async fn downstream_response(fwd: &mut ReplicationForwarder) -> Result<ResponseHeader, QueryError> {
    let response = fwd.recv_response().await.map_err(|e| {
        tracing::warn!(peer = %fwd.peer(), error = %e, "no response from replica");
        QueryError::transmission(e)
    })?;
    if response.is_ok() {
        tracing::debug!(peer = %fwd.peer(), relayed = fwd.relayed(), "replica confirmed");
        Ok(response)
    } else {
        Err(QueryError::Forwarding {
            peer: fwd.peer().to_string(),
            response,
        })
    }
}

/// Release a local write that will not be reported as stored.
async fn discard(local: BlockWriter) {
    let id = local.id().clone();
    let written = local.written();
    if let Err(e) = local.close().await {
        tracing::debug!(block = %id, error = %e, "closing partial block failed");
    }
    tracing::debug!(block = %id, written, "partial block left on disk");
}
