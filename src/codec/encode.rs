//! Reply encoding
//!
//! The three reply framings the broker emits on the subscriber port:
//! status lines, error lines, and bulk replies.

use bytes::{BufMut, BytesMut};

/// Append a status reply: `+<text>\r\n`.
pub fn status_reply(buf: &mut BytesMut, text: &str) {
    buf.reserve(text.len() + 3);
    buf.put_u8(b'+');
    buf.put_slice(text.as_bytes());
    buf.put_slice(b"\r\n");
}

/// Append an error reply: `-ERR <message>\r\n`.
///
/// CR and LF in the message body are replaced with spaces so a hostile or
/// clumsy message cannot corrupt the reply stream framing.
pub fn error_reply(buf: &mut BytesMut, message: &str) {
    buf.reserve(message.len() + 7);
    buf.put_slice(b"-ERR ");
    for &b in message.as_bytes() {
        buf.put_u8(if b == b'\r' || b == b'\n' { b' ' } else { b });
    }
    buf.put_slice(b"\r\n");
}

/// Append a bulk reply: `$<byte-length>\r\n<bytes>\r\n`.
pub fn bulk_reply(buf: &mut BytesMut, payload: &[u8]) {
    buf.reserve(payload.len() + 16);
    buf.put_u8(b'$');
    buf.put_slice(payload.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(payload);
    buf.put_slice(b"\r\n");
}
