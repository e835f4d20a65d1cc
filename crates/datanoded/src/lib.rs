//! clusterdfs DataNode: stores blocks as local files, serves STORE,
//! RETRIEVE and CODING queries over TCP, relays replicated writes down a
//! forward chain and pings the coordinator.

pub mod client;
pub mod connection;
pub mod forward;
pub mod heartbeat;
pub mod query;
pub mod server;

pub use client::{ClientError, CodingReply, DataNodeClient};
pub use heartbeat::HeartbeatStatus;
pub use query::{NodeContext, QueryError, QueryHandler, QueryState};
pub use server::{DataNode, RunningNode};
