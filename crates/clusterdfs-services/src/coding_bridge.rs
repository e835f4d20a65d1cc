//! Coding bridge — runs a `CodingOperation` against the local block store.
//!
//! Local operations are executed to completion and persisted. Stream
//! operations are exposed as a lazy, single-use stream of buffers: the next
//! buffer is only read and combined when the consumer polls for it, so the
//! caller controls back-pressure one buffer at a time.

use std::io;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use clusterdfs_core::coding::gf256;
use clusterdfs_core::{BlockId, CodingError, CodingOperation};

use crate::block_store::{BlockReceipt, BlockStore, BlockWriter, StoreError};

/// Buffers of a streamed coding result, in order. Consumed exactly once.
pub type CodingStream = BoxStream<'static, Result<Bytes, BridgeError>>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Invalid(#[from] CodingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("coding i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("operation is not a {0} operation")]
    WrongMode(&'static str),
}

#[derive(Debug, Clone)]
pub struct CodingBridge {
    store: BlockStore,
}

impl CodingBridge {
    pub fn new(store: BlockStore) -> Self {
        Self { store }
    }

    /// Execute a local operation and persist its result.
    pub async fn execute(&self, op: &CodingOperation) -> Result<BlockReceipt, BridgeError> {
        if op.is_stream() {
            return Err(BridgeError::WrongMode("local"));
        }
        op.validate()?;

        let mut combiner = Combiner::open(&self.store, op).await?;
        let mut buffers = 0usize;
        while combiner.next_buffer().await?.is_some() {
            buffers += 1;
        }
        let receipt = combiner
            .finish()
            .await?
            .ok_or(BridgeError::WrongMode("local"))?;

        tracing::info!(
            output = %receipt.id,
            bytes = receipt.bytes,
            buffers,
            digest = receipt.digest_hex(),
            "coding operation persisted"
        );
        Ok(receipt)
    }

    /// Open a stream operation. Input blocks are opened eagerly so that a
    /// missing block fails here, before anything is sent to the caller.
    pub async fn open_stream(&self, op: &CodingOperation) -> Result<CodingStream, BridgeError> {
        if !op.is_stream() {
            return Err(BridgeError::WrongMode("stream"));
        }
        op.validate()?;

        let combiner = Combiner::open(&self.store, op).await?;
        tracing::debug!(
            inputs = op.inputs.len(),
            total_bytes = combiner.remaining,
            buffer_size = op.buffer_size,
            "coding stream opened"
        );

        let stream = stream::try_unfold(combiner, |mut combiner| async move {
            match combiner.next_buffer().await? {
                Some(buffer) => Ok::<_, BridgeError>(Some((buffer, combiner))),
                None => {
                    if let Some(receipt) = combiner.finish().await? {
                        tracing::info!(
                            output = %receipt.id,
                            bytes = receipt.bytes,
                            digest = receipt.digest_hex(),
                            "coding stream persisted"
                        );
                    }
                    Ok(None)
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// One open input and how many of its bytes are still expected.
struct Input {
    block: BlockId,
    file: File,
    coefficient: u8,
    remaining: u64,
}

/// Reads every input in lock-step and folds them into one output buffer.
struct Combiner {
    inputs: Vec<Input>,
    sink: Option<BlockWriter>,
    buffer_size: usize,
    remaining: u64,
    scratch: Vec<u8>,
}

impl Combiner {
    async fn open(store: &BlockStore, op: &CodingOperation) -> Result<Self, BridgeError> {
        let mut inputs = Vec::with_capacity(op.inputs.len());
        let mut total = 0u64;
        for input in &op.inputs {
            let size = store.size(&input.block).await?;
            total = total.max(size);
            inputs.push(Input {
                block: input.block.clone(),
                file: store.open_read(&input.block).await?,
                coefficient: input.coefficient,
                remaining: size,
            });
        }

        // Inputs are open before the output is truncated.
        let sink = match op.output_block() {
            Some(output) => Some(store.open_write(output).await?),
            None => None,
        };

        Ok(Self {
            inputs,
            sink,
            buffer_size: op.buffer_size,
            remaining: total,
            scratch: vec![0u8; op.buffer_size],
        })
    }

    async fn next_buffer(&mut self) -> Result<Option<Bytes>, BridgeError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let len = self.remaining.min(self.buffer_size as u64) as usize;
        let mut out = vec![0u8; len];

        for input in self.inputs.iter_mut() {
            // Past its own end an input contributes zeros.
            let want = input.remaining.min(len as u64) as usize;
            let n = read_up_to(&mut input.file, &mut self.scratch[..want]).await?;
            if n < want {
                return Err(BridgeError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "block {} shrank during coding: {} bytes missing",
                        input.block,
                        input.remaining - n as u64
                    ),
                )));
            }
            input.remaining -= n as u64;
            gf256::mul_add_into(&mut out, &self.scratch[..n], input.coefficient);
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.write(&out).await?;
        }
        self.remaining -= len as u64;
        Ok(Some(Bytes::from(out)))
    }

    async fn finish(self) -> Result<Option<BlockReceipt>, BridgeError> {
        match self.sink {
            Some(sink) => Ok(Some(sink.close().await?)),
            None => Ok(None),
        }
    }
}

/// Fill `buf` unless EOF comes first. Returns the number of bytes read.
async fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
