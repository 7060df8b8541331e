//! tagrpc: a reactor server for a tag-delimited request/response protocol.
//!
//! Clients send messages framed by an outer tag (`<Tag>...</Tag>`) over
//! plain TCP. Each framed message is handed to a [`RequestHandler`] together
//! with a `(ConnectionId, RequestId)` pair; the handler answers, possibly
//! much later and from another thread, and the reply is spliced back into
//! the original request envelope and written on the same connection.
//!
//! Everything runs on one thread driven by a mio poll loop. No call ever
//! blocks on a socket: partial reads wait in the connection's receive
//! buffer, and partial writes wait in its transmit buffer, until the next
//! readiness notification.

pub mod config;
pub mod protocols;
pub mod runtime;

pub use config::{Config, ConfigError};
pub use runtime::{
    ConnectionId, EchoHandler, EventTarget, RequestHandler, RequestId, ResponseSender, Server,
    SubmitError,
};
