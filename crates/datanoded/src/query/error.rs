use std::error::Error as StdError;

use clusterdfs_core::protocol::{messages, BlockId, ResponseHeader};
use clusterdfs_core::CodingError;
use clusterdfs_services::{BridgeError, StoreError};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Why a query ended without a success response. Every variant maps to
/// exactly one ERROR header sent back before the connection closes.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("block {0} not found")]
    NotFound(BlockId),

    #[error("transmission failed: {0}")]
    Transmission(#[source] BoxError),

    /// The next hop answered with an error; relayed unchanged.
    #[error("replica {peer} failed: {}", .response.msg)]
    Forwarding {
        peer: String,
        response: ResponseHeader,
    },
}

impl QueryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        QueryError::Validation(msg.into())
    }

    pub fn transmission(err: impl Into<BoxError>) -> Self {
        QueryError::Transmission(err.into())
    }

    pub fn response(&self) -> ResponseHeader {
        match self {
            QueryError::Validation(msg) => ResponseHeader::error(msg.clone()),
            QueryError::NotFound(id) => ResponseHeader::error(format!("Block '{id}' not found.")),
            QueryError::Transmission(_) => ResponseHeader::error(messages::TRANSMISSION_FAILED),
            QueryError::Forwarding { response, .. } => response.clone(),
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => QueryError::NotFound(id),
            other => QueryError::transmission(other),
        }
    }
}

impl From<BridgeError> for QueryError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Invalid(e) => QueryError::from(e),
            BridgeError::Store(e) => QueryError::from(e),
            BridgeError::WrongMode(mode) => {
                QueryError::validation(format!("Not a {mode} coding operation."))
            }
            BridgeError::Io(e) => QueryError::transmission(e),
        }
    }
}

impl From<CodingError> for QueryError {
    fn from(err: CodingError) -> Self {
        QueryError::validation(format!("Invalid coding operation: {err}."))
    }
}
