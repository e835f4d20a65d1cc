//! Header objects exchanged between clients, DataNodes and the coordinator.
//!
//! Requests are a tagged union on `op`, decoded once at the connection
//! boundary. Responses carry `code`, `msg` and, when raw bytes follow,
//! the announced `length`.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

// ── Block Id ─────────────────────────────────────────────────────────────────

/// Maximum length of a block id in bytes.
pub const MAX_BLOCK_ID_LEN: usize = 255;

/// Opaque block identifier, validated so it always maps to exactly one
/// file directly under the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("empty")
        } else if id.len() > MAX_BLOCK_ID_LEN {
            Some("too long")
        } else if id == "." || id == ".." {
            Some("reserved name")
        } else if id.contains(|c| matches!(c, '/' | '\\' | '\0')) {
            Some("contains a path separator or NUL")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ProtocolError::InvalidBlockId { id, reason }),
            None => Ok(Self(id)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BlockId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BlockId::new(value)
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> String {
        id.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Peer Address ─────────────────────────────────────────────────────────────

/// A DataNode address in a forward chain. On the wire: `["host", port]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Target suitable for `TcpStream::connect`.
    pub fn connect_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl From<(String, u16)> for PeerAddr {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<PeerAddr> for (String, u16) {
    fn from(addr: PeerAddr) -> Self {
        (addr.host, addr.port)
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────────────────

/// One request per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    Store(StoreRequest),
    Retrieve(RetrieveRequest),
    Coding(CodingRequest),
}

impl Request {
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::Store(_) => "STORE",
            Request::Retrieve(_) => "RETRIEVE",
            Request::Coding(_) => "CODING",
        }
    }
}

/// Followed on the wire by exactly `length` raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub id: BlockId,
    /// Signed so that a non-positive length is a validation error rather
    /// than a decode error.
    pub length: i64,
    /// Remaining replicas. Absent or empty means last hop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fwdlist: Option<Vec<PeerAddr>>,
}

impl StoreRequest {
    /// Head of the forward chain and the header to send it, whose chain is
    /// the tail. `None` on the last hop.
    pub fn next_hop(&self) -> Option<(&PeerAddr, StoreRequest)> {
        let chain = self.fwdlist.as_deref()?;
        let (head, tail) = chain.split_first()?;
        Some((
            head,
            StoreRequest {
                id: self.id.clone(),
                length: self.length,
                fwdlist: Some(tail.to_vec()),
            },
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveRequest {
    pub id: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodingRequest {
    /// Serialized `CodingOperation`, opaque to the request layer.
    pub coding: String,
}

// ── Coordinator ──────────────────────────────────────────────────────────────

/// Messages a DataNode sends to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorRequest {
    Ping { datanode_port: u16 },
}

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub code: ResponseCode,
    #[serde(default)]
    pub msg: String,
    /// Size of the raw payload that follows this header, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl ResponseHeader {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Ok,
            msg: msg.into(),
            length: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Error,
            msg: msg.into(),
            length: None,
        }
    }

    /// OK response announcing `length` raw bytes to follow.
    pub fn announce(length: u64) -> Self {
        Self {
            code: ResponseCode::Ok,
            msg: messages::SENDING_DATA.to_string(),
            length: Some(length),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }
}

/// Fixed response texts. Clients match on some of these.
pub mod messages {
    pub const BLOCK_SIZE_NOT_POSITIVE: &str = "Block size has to be larger than zero.";
    pub const RANGE_EXCEEDS_BLOCK: &str = "The requested data is larger than block_size.";
    pub const TRANSMISSION_FAILED: &str = "Transmission failed.";
    pub const MALFORMED_REQUEST: &str = "Malformed request header.";
    pub const BLOCK_STORED: &str = "Block stored successfully.";
    pub const SENDING_DATA: &str = "Sending data.";
    pub const CODING_DONE: &str = "Coding operation finalized successfully.";
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid block id {id:?}: {reason}")]
    InvalidBlockId { id: String, reason: &'static str },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
