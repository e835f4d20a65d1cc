//! Block store — one file per block id, directly under the data directory.
//!
//!   {data_dir}/{block_id}
//!
//! Writes create-or-truncate; there is no versioning and no locking.
//! Two concurrent writers to the same id race, and whichever closes last
//! owns the on-disk content. Closing a `BlockWriter` is the durability
//! boundary: it flushes and fsyncs everything written so far.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use clusterdfs_core::BlockId;

const WRITE_BUFFER: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("block {0} not found")]
    NotFound(BlockId),

    #[error("block {id}: {source}")]
    Io {
        id: BlockId,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn from_io(id: &BlockId, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(id.clone())
        } else {
            StoreError::Io {
                id: id.clone(),
                source,
            }
        }
    }
}

/// Maps block ids to files under one directory.
#[derive(Debug, Clone)]
pub struct BlockStore {
    root: PathBuf,
}

impl BlockStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create data dir: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path backing a block. Pure function of the root.
    pub fn path(&self, id: &BlockId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Byte length of a stored block.
    pub async fn size(&self, id: &BlockId) -> Result<u64, StoreError> {
        let meta = tokio::fs::metadata(self.path(id))
            .await
            .map_err(|e| StoreError::from_io(id, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(meta.len())
    }

    /// Sequential reader positioned at offset 0.
    pub async fn open_read(&self, id: &BlockId) -> Result<File, StoreError> {
        File::open(self.path(id))
            .await
            .map_err(|e| StoreError::from_io(id, e))
    }

    /// Sequential writer that creates or truncates the block.
    pub async fn open_write(&self, id: &BlockId) -> Result<BlockWriter, StoreError> {
        let file = File::create(self.path(id))
            .await
            .map_err(|e| StoreError::from_io(id, e))?;
        tracing::trace!(block = %id, "block opened for writing");
        Ok(BlockWriter {
            id: id.clone(),
            file: BufWriter::with_capacity(WRITE_BUFFER, file),
            hasher: blake3::Hasher::new(),
            written: 0,
        })
    }
}

/// Outcome of closing a `BlockWriter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReceipt {
    pub id: BlockId,
    pub bytes: u64,
    /// BLAKE3 of the bytes written.
    pub digest: [u8; 32],
}

impl BlockReceipt {
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Buffered writer for one block. Must be closed with `close()`; dropping
/// it discards anything still buffered.
pub struct BlockWriter {
    id: BlockId,
    file: BufWriter<File>,
    hasher: blake3::Hasher,
    written: u64,
}

impl BlockWriter {
    pub fn id(&self) -> &BlockId {
        &self.id
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf).await?;
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(())
    }

    /// Flush and fsync everything written so far.
    pub async fn close(mut self) -> io::Result<BlockReceipt> {
        self.file.flush().await?;
        self.file.get_mut().sync_all().await?;
        Ok(BlockReceipt {
            id: self.id,
            bytes: self.written,
            digest: *self.hasher.finalize().as_bytes(),
        })
    }
}
