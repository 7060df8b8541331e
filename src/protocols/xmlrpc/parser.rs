//! Incremental framer for tag-delimited messages.
//!
//! ```text
//! message := whitespace* '<' tagName '>' body '</' tagName '>'
//! tagName := run of bytes up to the next '>'
//! ```
//!
//! The framer never consumes input itself; it reports how many bytes make up
//! the first complete message so the caller can split them off its receive
//! buffer. An incomplete opening tag, or a body whose closing tag has not
//! arrived yet, is reported as `Incomplete` and the caller waits for more
//! bytes.

use crate::runtime::Scanner;
use std::ops::Range;

/// Parse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete message sits at the front of the input.
    Complete {
        /// Length of the message, from the start of the input (including
        /// leading whitespace) through the end of the closing tag.
        frame_len: usize,
        /// Bytes to drop from the input: the message plus any whitespace
        /// that follows it.
        consumed: usize,
    },
    /// Need more data.
    Incomplete,
}

/// Locate the first complete message in `input`.
pub fn parse(input: &[u8]) -> ParseResult {
    let Some(bounds) = locate(input) else {
        return ParseResult::Incomplete;
    };

    let mut sc = Scanner::new(input);
    sc.skip_n(bounds.frame_end);
    sc.skip_whitespace();

    ParseResult::Complete {
        frame_len: bounds.frame_end,
        consumed: sc.position(),
    }
}

/// Bytes between the outer opening tag and its closing tag.
///
/// Returns `None` when `frame` does not hold a complete message.
pub fn payload(frame: &[u8]) -> Option<&[u8]> {
    locate(frame).map(|bounds| &frame[bounds.body])
}

struct Bounds {
    body: Range<usize>,
    frame_end: usize,
}

fn locate(input: &[u8]) -> Option<Bounds> {
    let mut sc = Scanner::new(input);
    sc.skip_whitespace();
    if !sc.skip_to_byte(b'<') {
        return None;
    }
    sc.skip_n(1);

    let anchor = sc.position();
    if !sc.skip_to_byte(b'>') {
        return None;
    }
    let closing = closing_tag(sc.slice_from(anchor));
    sc.skip_n(1);
    let body_start = sc.position();

    if !sc.skip_to_subslice(&closing) {
        return None;
    }
    let body_end = sc.position();
    sc.skip_n(closing.len());

    Some(Bounds {
        body: body_start..body_end,
        frame_end: sc.position(),
    })
}

/// Build `</tag>` for an opening tag name.
fn closing_tag(tag: &[u8]) -> Vec<u8> {
    let mut closing = Vec::with_capacity(tag.len() + 3);
    closing.extend_from_slice(b"</");
    closing.extend_from_slice(tag);
    closing.push(b'>');
    closing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete() {
        match parse(b"<Req>hi</Req>") {
            ParseResult::Complete {
                frame_len: 13,
                consumed: 13,
            } => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_leading_whitespace_is_part_of_frame() {
        match parse(b"\r\n  <a>x</a>") {
            ParseResult::Complete {
                frame_len,
                consumed,
            } => {
                assert_eq!(frame_len, 12);
                assert_eq!(consumed, 12);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_trailing_whitespace_is_consumed() {
        let input = b"<a>x</a>\r\n \t<b>";
        match parse(input) {
            ParseResult::Complete {
                frame_len,
                consumed,
            } => {
                assert_eq!(&input[..frame_len], b"<a>x</a>");
                assert_eq!(&input[consumed..], b"<b>");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_only_first_message_reported() {
        let input = b"<a>1</a><a>2</a>";
        match parse(input) {
            ParseResult::Complete {
                frame_len,
                consumed,
            } => {
                assert_eq!(frame_len, 8);
                assert_eq!(consumed, 8);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_without_open_bracket() {
        assert_eq!(parse(b""), ParseResult::Incomplete);
        assert_eq!(parse(b"   \r\n"), ParseResult::Incomplete);
        assert_eq!(parse(b"garbage"), ParseResult::Incomplete);
    }

    #[test]
    fn test_incomplete_opening_tag() {
        assert_eq!(parse(b"<Requ"), ParseResult::Incomplete);
    }

    #[test]
    fn test_incomplete_body() {
        assert_eq!(parse(b"<Request>abc</Requ"), ParseResult::Incomplete);
        assert_eq!(parse(b"<Request>abc"), ParseResult::Incomplete);
    }

    #[test]
    fn test_garbage_before_tag_is_part_of_frame() {
        let input = b"xx<a>1</a>";
        match parse(input) {
            ParseResult::Complete { frame_len, .. } => assert_eq!(frame_len, input.len()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_nested_same_tag_is_lexical() {
        // The first literal closing tag ends the frame.
        let input = b"<a><a>in</a></a>";
        match parse(input) {
            ParseResult::Complete { frame_len, .. } => {
                assert_eq!(&input[..frame_len], b"<a><a>in</a>");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_attributes_become_part_of_tag_name() {
        // `</Request id="1">` never appears, so the frame never completes.
        assert_eq!(
            parse(b"<Request id=\"1\">x</Request>"),
            ParseResult::Incomplete
        );
    }

    #[test]
    fn test_payload() {
        assert_eq!(payload(b"<Req>hi</Req>"), Some(&b"hi"[..]));
        assert_eq!(
            payload(b" <Call><Request>x</Request></Call>"),
            Some(&b"<Request>x</Request>"[..])
        );
        assert_eq!(payload(b"<Req>hi"), None);
    }
}
