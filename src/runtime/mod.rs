//! Single-threaded reactor runtime.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//!
//! - `Scanner`: bounds-checked cursor used by framing and envelope splicing
//! - `Connection`: per-socket buffers, framing, request correlation
//! - `Server`: listener, connection registry, poll loop, reply injection
//! - `ConnectionId` / `RequestId`: correlation identifiers

mod buffer;
mod connection;
mod error;
mod event_loop;
mod handler;
mod token;

pub use buffer::{find_subslice, Scanner};
pub use connection::{Connection, ConnectionRegistry, Readiness, Stream, DEFAULT_READ_CHUNK};
pub use error::{CloseReason, ResponseError, SubmitError};
pub use event_loop::Server;
pub use handler::{EchoHandler, EventTarget, RequestHandler, ResponseSender};
pub use token::{ConnectionId, RequestId};
