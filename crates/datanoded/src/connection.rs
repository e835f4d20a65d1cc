//! Duplex transport for one query or one outbound exchange.
//!
//! Header objects go through the frame codec; block bodies are read from a
//! bounded view over the same buffered reader so that body bytes already
//! pulled in behind a header are never lost.

use std::io;
use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, Take};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use clusterdfs_core::wire::{self, Frame, FrameKind, WireError};

const IO_BUFFER: usize = 64 * 1024;

pub type BodyReader<'a> = Take<&'a mut BufReader<OwnedReadHalf>>;

pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::with_capacity(IO_BUFFER, read),
            writer: BufWriter::with_capacity(IO_BUFFER, write),
            peer,
        })
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one header object and flush.
    pub async fn send<T: Serialize + ?Sized>(&mut self, header: &T) -> Result<(), WireError> {
        wire::send_header(&mut self.writer, header).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, WireError> {
        wire::recv_header(&mut self.reader).await
    }

    /// Send one frame and flush; returns once the frame has left our buffer.
    pub async fn send_frame(&mut self, kind: FrameKind, payload: &[u8]) -> Result<(), WireError> {
        wire::write_frame(&mut self.writer, kind, payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn recv_frame(&mut self) -> Result<Frame, WireError> {
        wire::read_frame(&mut self.reader).await
    }

    /// Read view limited to exactly the next `length` incoming bytes.
    pub fn body(&mut self, length: u64) -> BodyReader<'_> {
        (&mut self.reader).take(length)
    }

    /// Raw outgoing byte sink. Callers flush when done.
    pub fn sink(&mut self) -> &mut BufWriter<OwnedWriteHalf> {
        &mut self.writer
    }

    pub async fn write_raw(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    /// Flush and half-close. Failures are logged, never returned.
    pub async fn close(mut self) {
        if let Err(e) = self.writer.flush().await {
            tracing::trace!(peer = %self.peer, error = %e, "flush on close failed");
        }
        if let Err(e) = self.writer.shutdown().await {
            tracing::trace!(peer = %self.peer, error = %e, "shutdown on close failed");
        }
    }
}
