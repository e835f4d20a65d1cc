//! CODING: run a coding operation against local blocks.
//!
//! Stream results go back as DATA frames followed by END. Each frame is
//! flushed before the next buffer is computed, so a slow reader slows the
//! computation down instead of growing memory. A failure after the first
//! frame ends the stream with an ERROR header in place of END.

use futures::TryStreamExt;

use clusterdfs_core::protocol::{messages, CodingRequest, ResponseHeader};
use clusterdfs_core::wire::FrameKind;
use clusterdfs_core::CodingOperation;

use super::error::QueryError;
use super::{QueryHandler, QueryState, Reply};

impl QueryHandler {
    pub(super) async fn coding(&mut self, req: CodingRequest) -> Result<Reply, QueryError> {
        let ctx = self.ctx.clone();
        let op = CodingOperation::unserialize(&req.coding)?;

        if !op.is_stream() {
            let receipt = ctx.bridge.execute(&op).await?;
            tracing::info!(
                output = %receipt.id,
                inputs = op.inputs.len(),
                bytes = receipt.bytes,
                "local coding operation finished"
            );
            return Ok(Reply::Respond(ResponseHeader::ok(messages::CODING_DONE)));
        }

        let mut stream = ctx.bridge.open_stream(&op).await?;
        self.transition(QueryState::Responding);

        let mut buffers = 0usize;
        let mut bytes = 0u64;
        while let Some(buffer) = stream.try_next().await.map_err(|e| {
            tracing::warn!(buffers, error = %e, "coding stream failed part way");
            QueryError::from(e)
        })? {
            self.conn
                .send_frame(FrameKind::Data, &buffer)
                .await
                .map_err(QueryError::transmission)?;
            buffers += 1;
            bytes += buffer.len() as u64;
        }
        self.conn
            .send_frame(FrameKind::End, &[])
            .await
            .map_err(QueryError::transmission)?;

        tracing::info!(inputs = op.inputs.len(), buffers, bytes, "coding stream finished");
        Ok(Reply::Sent)
    }
}
