//! clusterdfs wire format — framing for every non-body message.
//!
//! A frame is an 8-byte `FrameHeader` followed by `length` payload bytes.
//! Header objects travel as JSON inside `Header` frames; coding results
//! travel as `Data` frames closed by an `End` frame. Block bodies for STORE
//! and RETRIEVE are NOT framed: they follow their header as exactly the
//! declared number of raw bytes.
//!
//! The layout is fixed: changing a field size or a kind byte breaks every
//! deployed node.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use static_assertions::assert_eq_size;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::byteorder::network_endian::U32;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Prefix of every frame.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    /// One of the `FrameKind` bytes.
    pub kind: u8,

    /// Reserved, must be zero.
    pub flags: u8,

    /// Reserved, must be zero.
    pub reserved: [u8; 2],

    /// Payload length in bytes, big-endian. Does not include this header.
    pub length: U32,
}

assert_eq_size!(FrameHeader, [u8; 8]);

pub const FRAME_HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

/// Largest payload any frame may declare.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Largest JSON header object accepted in a `Header` frame.
pub const MAX_HEADER_PAYLOAD: usize = 1024 * 1024;

// ── Frame Kind ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// JSON-encoded header object (request, response, ping, list marker).
    Header = 0x01,

    /// One buffer of a streamed coding result.
    Data = 0x02,

    /// End of a streamed coding result. Always empty.
    End = 0x03,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Header),
            0x02 => Ok(FrameKind::Data),
            0x03 => Ok(FrameKind::End),
            other => Err(WireError::UnknownFrameKind(other)),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(k: FrameKind) -> u8 {
        k as u8
    }
}

/// A decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("reserved frame bits are non-zero: 0x{0:02x}")]
    ReservedBitsSet(u8),

    #[error("payload length {0} exceeds maximum")]
    PayloadTooLarge(usize),

    #[error("expected {expected:?} frame, got {got:?}")]
    UnexpectedFrame { expected: FrameKind, got: FrameKind },

    #[error("malformed header object: {0}")]
    Json(#[from] serde_json::Error),
}

impl WireError {
    /// True when the failure came from the transport rather than from
    /// the content of a frame.
    pub fn is_transport(&self) -> bool {
        matches!(self, WireError::Io(_) | WireError::Closed)
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Write one frame. Does not flush.
pub async fn write_frame<W>(writer: &mut W, kind: FrameKind, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }
    let header = FrameHeader {
        kind: kind.into(),
        flags: 0,
        reserved: [0; 2],
        length: U32::new(payload.len() as u32),
    };
    writer.write_all(header.as_bytes()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    Ok(())
}

/// Read one frame. A clean EOF before the first header byte is `Closed`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    let first = reader.read(&mut raw).await?;
    if first == 0 {
        return Err(WireError::Closed);
    }
    reader.read_exact(&mut raw[first..]).await?;

    let header = FrameHeader::read_from(raw.as_slice()).ok_or(WireError::Closed)?;
    if header.flags != 0 || header.reserved != [0; 2] {
        return Err(WireError::ReservedBitsSet(header.flags | header.reserved[0] | header.reserved[1]));
    }
    let kind = FrameKind::try_from(header.kind)?;
    let length = header.length.get() as usize;
    let limit = match kind {
        FrameKind::Header => MAX_HEADER_PAYLOAD,
        FrameKind::Data | FrameKind::End => MAX_FRAME_PAYLOAD,
    };
    if length > limit {
        return Err(WireError::PayloadTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(Frame {
        kind,
        payload: Bytes::from(payload),
    })
}

/// Serialize `value` as JSON and send it in a `Header` frame.
pub async fn send_header<W, T>(writer: &mut W, value: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_vec(value)?;
    if encoded.len() > MAX_HEADER_PAYLOAD {
        return Err(WireError::PayloadTooLarge(encoded.len()));
    }
    write_frame(writer, FrameKind::Header, &encoded).await
}

/// Receive a `Header` frame and decode its JSON object.
pub async fn recv_header<R, T>(reader: &mut R) -> Result<T, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let frame = read_frame(reader).await?;
    decode_header(&frame)
}

/// Decode an already-read frame as a header object.
pub fn decode_header<T: DeserializeOwned>(frame: &Frame) -> Result<T, WireError> {
    if frame.kind != FrameKind::Header {
        return Err(WireError::UnexpectedFrame {
            expected: FrameKind::Header,
            got: frame.kind,
        });
    }
    if frame.payload.len() > MAX_HEADER_PAYLOAD {
        return Err(WireError::PayloadTooLarge(frame.payload.len()));
    }
    Ok(serde_json::from_slice(&frame.payload)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
