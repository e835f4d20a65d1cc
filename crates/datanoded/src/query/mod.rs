//! Per-connection query handling.
//!
//! One connection carries exactly one request:
//!
//!   AwaitingHeader → Dispatched → {Storing | Retrieving | Coding}
//!                  → Responding → Closed
//!
//! A malformed header skips straight to Responding with an ERROR. The
//! connection is closed after the single response on every path.

mod coding;
mod error;
mod retrieve;
mod store;

use std::fmt;
use std::sync::Arc;

use clusterdfs_core::protocol::{messages, Request, ResponseHeader};
use clusterdfs_core::wire::WireError;
use clusterdfs_core::DataNodeConfig;
use clusterdfs_services::{BlockStore, CodingBridge};

use crate::connection::Connection;

pub use error::QueryError;

/// Everything a handler needs, shared by all connections of one node.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub config: Arc<DataNodeConfig>,
    pub store: BlockStore,
    pub bridge: CodingBridge,
}

impl NodeContext {
    pub fn new(config: Arc<DataNodeConfig>, store: BlockStore) -> Self {
        let bridge = CodingBridge::new(store.clone());
        Self {
            config,
            store,
            bridge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    AwaitingHeader,
    Dispatched,
    Storing,
    Retrieving,
    Coding,
    Responding,
    Closed,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryState::AwaitingHeader => "awaiting_header",
            QueryState::Dispatched => "dispatched",
            QueryState::Storing => "storing",
            QueryState::Retrieving => "retrieving",
            QueryState::Coding => "coding",
            QueryState::Responding => "responding",
            QueryState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl QueryState {
    /// Whether a handler in this state may move to `next`.
    pub fn allows(self, next: QueryState) -> bool {
        use QueryState::*;
        matches!(
            (self, next),
            (AwaitingHeader, Dispatched | Responding | Closed)
                | (Dispatched, Storing | Retrieving | Coding)
                | (Storing | Retrieving | Coding, Responding)
                | (Responding, Closed)
        )
    }
}

/// How an operation finished when it did not fail.
pub(crate) enum Reply {
    /// Send this header, then close.
    Respond(ResponseHeader),
    /// The operation already entered `Responding` and wrote its own
    /// response.
    Sent,
}

pub struct QueryHandler {
    conn: Connection,
    ctx: Arc<NodeContext>,
    state: QueryState,
}

impl QueryHandler {
    pub fn new(conn: Connection, ctx: Arc<NodeContext>) -> Self {
        Self {
            conn,
            ctx,
            state: QueryState::AwaitingHeader,
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    fn transition(&mut self, next: QueryState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.allows(next),
            "illegal query transition {} -> {}",
            self.state,
            next
        );
        tracing::trace!(peer = %self.conn.peer_addr(), from = %self.state, to = %next, "query state");
        self.state = next;
    }

    /// Serve the one request on this connection. Only transport failures
    /// before a request was read are returned; everything else is answered
    /// on the wire and logged.
    pub async fn run(mut self) -> Result<(), WireError> {
        let peer = self.conn.peer_addr();

        let request = match self.conn.recv::<Request>().await {
            Ok(request) => request,
            Err(WireError::Closed) => {
                tracing::debug!(peer = %peer, "connection closed before a request");
                self.finish().await;
                return Ok(());
            }
            Err(e) if e.is_transport() => {
                self.finish().await;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "malformed request header");
                self.respond(ResponseHeader::error(messages::MALFORMED_REQUEST))
                    .await;
                self.finish().await;
                return Ok(());
            }
        };

        let op = request.op_name();
        self.transition(QueryState::Dispatched);
        tracing::debug!(peer = %peer, op, "request received");

        let outcome = match request {
            Request::Store(req) => {
                self.transition(QueryState::Storing);
                store::handle(&mut self.conn, &self.ctx, req)
                    .await
                    .map(Reply::Respond)
            }
            Request::Retrieve(req) => {
                self.transition(QueryState::Retrieving);
                self.retrieve(req).await
            }
            Request::Coding(req) => {
                self.transition(QueryState::Coding);
                self.coding(req).await
            }
        };

        match outcome {
            Ok(Reply::Respond(response)) => self.respond(response).await,
            Ok(Reply::Sent) => {}
            Err(e) => {
                tracing::warn!(peer = %peer, op, error = %e, "query failed");
                self.respond(e.response()).await;
            }
        }
        self.finish().await;
        Ok(())
    }

    async fn respond(&mut self, response: ResponseHeader) {
        self.transition(QueryState::Responding);
        if let Err(e) = self.conn.send(&response).await {
            tracing::debug!(peer = %self.conn.peer_addr(), error = %e, "response not delivered");
        }
    }

    async fn finish(mut self) {
        self.transition(QueryState::Closed);
        self.conn.close().await;
    }
}
