//! clusterdfs-services — disk-facing DataNode services.
//!
//! `BlockStore` maps block ids to files; `CodingBridge` runs coding
//! operations against it. Nothing in this crate touches the network.

pub mod block_store;
pub mod coding_bridge;

pub use block_store::{BlockReceipt, BlockStore, BlockWriter, StoreError};
pub use coding_bridge::{BridgeError, CodingBridge, CodingStream};
