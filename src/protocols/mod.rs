//! Protocol implementations.
//!
//! Each protocol has a parser module used by the runtime connections.
//!
//! - `xmlrpc`: tag-delimited request/response envelopes

pub mod xmlrpc;
