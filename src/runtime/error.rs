//! Error types for the connection engine and the reactor.

use crate::runtime::{ConnectionId, RequestId};
use std::io;
use thiserror::Error;

/// Why a connection must be torn down.
///
/// Returned from the connection's I/O paths. The server reacts to any of
/// these by dropping the connection, which closes its socket.
#[derive(Debug, Error)]
pub enum CloseReason {
    /// The peer closed its end (zero-byte read).
    #[error("connection closed by peer")]
    PeerClosed,

    /// A read or write failed.
    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The poller flagged an exceptional condition on the socket.
    #[error("exceptional condition on socket")]
    Exception {
        /// Pending socket error, when the socket could report one.
        error: Option<io::Error>,
    },
}

/// Failure to queue a response on a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResponseError {
    /// No request with this id is retained on the connection.
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),
}

/// Failure to route a response or event to a connection.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("unknown request {request_id} on connection {connection_id}")]
    UnknownRequest {
        connection_id: ConnectionId,
        request_id: RequestId,
    },

    /// The reactor that owned the response queue has shut down.
    #[error("reactor is no longer running")]
    ReactorGone,

    /// Waking the reactor failed.
    #[error("failed to wake reactor: {0}")]
    Wake(#[source] io::Error),
}

impl SubmitError {
    pub(crate) fn on_connection(connection_id: ConnectionId, err: ResponseError) -> Self {
        match err {
            ResponseError::UnknownRequest(request_id) => SubmitError::UnknownRequest {
                connection_id,
                request_id,
            },
        }
    }
}
