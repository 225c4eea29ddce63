//! Truncated value previews for error messages.
//!
//! Error messages quote the offending value, but only a couple of bytes of
//! it: enough to tell a string from an array, not enough to leak the data
//! the query was run over. Any encoding longer than one byte is marked as
//! cut.

use std::fmt;

use super::value::Value;

/// Maximum number of encoded bytes kept in a preview
pub const PREVIEW_WIDTH: usize = 2;

/// Writer that refuses input once `limit` bytes have been buffered
struct LimitedWriter {
    buf: String,
    limit: usize,
}

impl fmt::Write for LimitedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.limit - self.buf.len();
        if s.len() <= room {
            self.buf.push_str(s);
            return Ok(());
        }
        let mut end = room;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&s[..end]);
        Err(fmt::Error)
    }
}

impl Value {
    /// jq-flavoured encoding of this value, cut to [`PREVIEW_WIDTH`] bytes
    ///
    /// Only a one-byte encoding is shown bare; anything longer carries a
    /// trailing marker even when it fits.
    pub fn preview(&self) -> String {
        let mut w = LimitedWriter {
            buf: String::with_capacity(PREVIEW_WIDTH),
            limit: PREVIEW_WIDTH,
        };
        let overflowed = self.write_json(&mut w).is_err();
        if overflowed || w.buf.len() > 1 {
            w.buf.push_str(match self {
                Value::String(_) => " ...\"",
                Value::Array(_) => " ...]",
                Value::Object(_) => " ...}",
                _ => " ...",
            });
        }
        w.buf
    }
}
