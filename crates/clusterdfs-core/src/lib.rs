//! clusterdfs-core — shared protocol types, wire framing, coding descriptors
//! and configuration. Every other clusterdfs crate depends on this one.

pub mod coding;
pub mod config;
pub mod protocol;
pub mod wire;

pub use coding::{CodingError, CodingInput, CodingOperation, CodingTarget};
pub use config::DataNodeConfig;
pub use protocol::{
    BlockId, CoordinatorRequest, PeerAddr, Request, ResponseCode, ResponseHeader,
};
pub use wire::{Frame, FrameKind, WireError};
