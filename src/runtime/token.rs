//! Identifiers used to correlate requests with their eventual responses.
//!
//! A response produced asynchronously by the application names its target
//! by `(ConnectionId, RequestId)`. Connection ids come from a process-wide
//! counter and are never reused, so a stale id can never reach a newer
//! connection that happens to occupy the same mio token.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Next connection id to hand out. Starts at 1 and only grows.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id from the process-wide counter.
    pub fn allocate() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-connection request identifier, assigned in framing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Id given to the first message framed on a connection.
    pub const FIRST: RequestId = RequestId(1);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// The id that follows this one.
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
