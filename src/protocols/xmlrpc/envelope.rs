//! Response envelope reconstruction.
//!
//! A response is formed by starting with the stored request and inserting
//! the response body between `<Response>` tags right after `</Request>`, at
//! the same level as the request element. Whatever followed `</Request>` in
//! the original message (usually the rest of the outer envelope) is copied
//! through unchanged.

use crate::runtime::Scanner;
use bytes::BytesMut;

/// Closing tag after which the response element is inserted.
pub const REQUEST_CLOSE: &[u8] = b"</Request>";

const RESPONSE_OPEN: &[u8] = b"<Response>";
const RESPONSE_CLOSE: &[u8] = b"</Response>";
const CRLF: &[u8] = b"\r\n";
const INDENT: &[u8] = b"  ";

/// Build the response envelope for `request` carrying `body`.
///
/// Without a literal `</Request>` in the request only a bare
/// `<Response>body</Response>` is produced.
pub fn splice(request: &[u8], body: &[u8]) -> BytesMut {
    let mut sc = Scanner::new(request);
    if !sc.skip_to_subslice(REQUEST_CLOSE) {
        let mut out = BytesMut::with_capacity(body.len() + 21);
        out.extend_from_slice(RESPONSE_OPEN);
        out.extend_from_slice(body);
        out.extend_from_slice(RESPONSE_CLOSE);
        return out;
    }
    sc.skip_n(REQUEST_CLOSE.len());

    let mut out = BytesMut::with_capacity(request.len() + body.len() + 30);
    out.extend_from_slice(sc.slice_from(0));
    out.extend_from_slice(CRLF);
    out.extend_from_slice(INDENT);
    out.extend_from_slice(RESPONSE_OPEN);
    out.extend_from_slice(body);
    out.extend_from_slice(RESPONSE_CLOSE);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(sc.remaining());
    out
}
