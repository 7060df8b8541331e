//! Tag-delimited request/response protocol.
//!
//! A lightweight XML-RPC-like envelope carried over raw TCP:
//! - Client sends a message framed by an outer tag: `<Tag> ... </Tag>`
//! - Server answers by echoing the request envelope with a `<Response>`
//!   element spliced in after `</Request>`
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  <Request>payload</Request>
//! Response: <Request>payload</Request>\r\n  <Response>result</Response>\r\n
//!
//! Request:  <Call><Request>payload</Request></Call>
//! Response: <Call><Request>payload</Request>\r\n  <Response>result</Response>\r\n</Call>
//! ```
//!
//! Framing is purely lexical. The closing tag is found by literal search, so
//! nested elements sharing the outer tag name and opening tags carrying
//! attributes are not supported. Nothing here validates XML.

pub mod envelope;
pub mod parser;

pub use envelope::splice;
pub use parser::{parse, payload, ParseResult};
