//! Bounds-checked scanning over received bytes.
//!
//! `Scanner` is a cursor over a borrowed byte slice. Every movement clamps
//! at the end of the slice, so a scan that runs out of input simply reports
//! `eof()` instead of reading past the buffer. Framing and envelope
//! reconstruction are both written in terms of these primitives.

/// Cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True once the cursor has reached the end of the input.
    pub fn eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Advance past spaces, tabs, and line breaks.
    pub fn skip_whitespace(&mut self) {
        while self.pos < self.buf.len() && is_whitespace(self.buf[self.pos]) {
            self.pos += 1;
        }
    }

    /// Advance to the next occurrence of `byte`.
    ///
    /// Returns `false` and leaves the cursor at the end when `byte` does not
    /// occur in the remaining input.
    pub fn skip_to_byte(&mut self, byte: u8) -> bool {
        match self.remaining().iter().position(|&b| b == byte) {
            Some(offset) => {
                self.pos += offset;
                true
            }
            None => {
                self.pos = self.buf.len();
                false
            }
        }
    }

    /// Advance to the start of the next occurrence of `needle`.
    ///
    /// Returns `false` and leaves the cursor at the end when `needle` does
    /// not occur in the remaining input.
    pub fn skip_to_subslice(&mut self, needle: &[u8]) -> bool {
        match find_subslice(self.remaining(), needle) {
            Some(offset) => {
                self.pos += offset;
                true
            }
            None => {
                self.pos = self.buf.len();
                false
            }
        }
    }

    /// Advance `n` bytes, stopping at the end of the input.
    pub fn skip_n(&mut self, n: usize) {
        self.pos = self.pos.saturating_add(n).min(self.buf.len());
    }

    /// Bytes between `anchor` and the cursor.
    pub fn slice_from(&self, anchor: usize) -> &'a [u8] {
        &self.buf[anchor.min(self.pos)..self.pos]
    }

    /// Bytes from the cursor to the end of the input.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Offset of the first occurrence of `needle` in `haystack`.
///
/// An empty needle matches at offset 0.
pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}
