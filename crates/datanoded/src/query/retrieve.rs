use std::io::SeekFrom;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use clusterdfs_core::protocol::{messages, ResponseHeader, RetrieveRequest};

use super::error::QueryError;
use super::{QueryHandler, QueryState, Reply};

impl QueryHandler {
    /// RETRIEVE: announce the range length, then send exactly that many raw
    /// bytes starting at `offset`.
    pub(super) async fn retrieve(&mut self, req: RetrieveRequest) -> Result<Reply, QueryError> {
        let ctx = self.ctx.clone();
        let block_size = ctx.store.size(&req.id).await?;
        let offset = req.offset.unwrap_or(0);
        let length = req.length.unwrap_or(block_size);

        let in_range = offset
            .checked_add(length)
            .map_or(false, |end| end <= block_size);
        if !in_range {
            tracing::debug!(block = %req.id, offset, length, block_size, "range outside block");
            return Err(QueryError::validation(messages::RANGE_EXCEEDS_BLOCK));
        }

        let mut file = ctx.store.open_read(&req.id).await?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(QueryError::transmission)?;
        }

        tracing::info!(block = %req.id, offset, length, "sending block");
        self.transition(QueryState::Responding);
        self.conn
            .send(&ResponseHeader::announce(length))
            .await
            .map_err(QueryError::transmission)?;

        let mut range = file.take(length);
        let sent = tokio::io::copy(&mut range, self.conn.sink())
            .await
            .map_err(QueryError::transmission)?;
        self.conn.flush().await.map_err(QueryError::transmission)?;

        if sent != length {
            return Err(QueryError::transmission(format!(
                "block shrank while sending: {sent} of {length} bytes"
            )));
        }
        tracing::debug!(block = %req.id, bytes = sent, "block sent");
        Ok(Reply::Sent)
    }
}
