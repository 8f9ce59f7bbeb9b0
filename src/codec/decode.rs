//! Subscriber request decoder
//!
//! Incremental, re-entrant parser for the two request framings the subscriber
//! port accepts: multibulk (`*<count>\r\n` followed by `count` occurrences of
//! `$<len>\r\n<len bytes>\r\n`) and inline (a single newline-terminated line
//! of shell-quoted tokens). Partial frames keep their parse state across
//! calls without consuming bytes they have not fully framed, so a request
//! split over any number of socket reads is reassembled losslessly.

use bytes::{Buf, Bytes, BytesMut};

use super::{DEFAULT_MAX_BULK, DEFAULT_MAX_INLINE, DEFAULT_MAX_MULTIBULK};
use crate::protocol::ProtocolError;

/// Request framing, selected by the first byte of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Inline,
    Multibulk,
}

/// Incremental request decoder, one per subscriber connection.
pub struct Decoder {
    max_inline: usize,
    max_multibulk: usize,
    max_bulk: usize,
    /// Framing of the request currently being parsed
    req_type: Option<RequestKind>,
    /// Multibulk elements still to be read
    multi_bulk_len: usize,
    /// Expected length of the bulk element currently being read
    bulk_len: Option<usize>,
    /// Arguments collected so far for the current request
    argv: Vec<Bytes>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_inline: DEFAULT_MAX_INLINE,
            max_multibulk: DEFAULT_MAX_MULTIBULK,
            max_bulk: DEFAULT_MAX_BULK,
            req_type: None,
            multi_bulk_len: 0,
            bulk_len: None,
            argv: Vec::new(),
        }
    }

    pub fn with_limits(mut self, max_inline: usize, max_multibulk: usize, max_bulk: usize) -> Self {
        self.max_inline = max_inline;
        self.max_multibulk = max_multibulk;
        self.max_bulk = max_bulk;
        self
    }

    /// Drop all partial parse state. The request being assembled is lost.
    fn reset(&mut self) {
        self.req_type = None;
        self.multi_bulk_len = 0;
        self.bulk_len = None;
        self.argv.clear();
    }

    /// Try to decode one complete request out of `buf`.
    ///
    /// Returns `Ok(Some(argv))` when a full request was framed (its bytes are
    /// consumed from `buf`), `Ok(None)` when more data is needed (nothing
    /// consumed beyond fully framed elements), and `Err` on a protocol error
    /// (offending bytes discarded, parse state reset, connection reusable).
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, ProtocolError> {
        loop {
            if self.req_type.is_none() {
                if buf.is_empty() {
                    return Ok(None);
                }
                self.req_type = Some(if buf[0] == b'*' {
                    RequestKind::Multibulk
                } else {
                    RequestKind::Inline
                });
            }

            let result = match self.req_type.unwrap() {
                RequestKind::Inline => self.parse_inline(buf),
                RequestKind::Multibulk => self.parse_multibulk(buf),
            };

            match result {
                Ok(Some(argv)) => {
                    self.reset();
                    if argv.is_empty() {
                        // Empty line or `*0` frame: not a command, keep going
                        continue;
                    }
                    return Ok(Some(argv));
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
    }

    /// Parse an inline request: a `\n`-terminated (optionally `\r\n`) line of
    /// shell-quoted tokens.
    fn parse_inline(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, ProtocolError> {
        let nl = match buf.iter().position(|&b| b == b'\n') {
            Some(nl) => nl,
            None => {
                if buf.len() > self.max_inline {
                    buf.clear();
                    return Err(ProtocolError::InlineTooLarge);
                }
                return Ok(None);
            }
        };

        let mut line_len = nl;
        if line_len > 0 && buf[line_len - 1] == b'\r' {
            line_len -= 1;
        }
        let line = buf[..line_len].to_vec();
        buf.advance(nl + 1);

        if line.len() > self.max_inline {
            return Err(ProtocolError::InlineTooLarge);
        }
        split_inline_args(&line).map(Some)
    }

    /// Parse a multibulk request, resuming from whatever state the previous
    /// call left behind.
    fn parse_multibulk(&mut self, buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, ProtocolError> {
        if self.multi_bulk_len == 0 {
            // Element count line not read yet
            let line = match read_line(buf) {
                LineStatus::Complete(end) => end,
                LineStatus::Incomplete => {
                    if buf.len() > self.max_inline {
                        buf.clear();
                        return Err(ProtocolError::InvalidMultibulkLength);
                    }
                    return Ok(None);
                }
            };

            let count = parse_int(&buf[1..line]);
            buf.advance(line + 2);
            let count = match count {
                Some(n) if n <= self.max_multibulk as i64 => n,
                _ => return Err(ProtocolError::InvalidMultibulkLength),
            };
            if count <= 0 {
                // `*0` and negative counts frame no command
                return Ok(Some(Vec::new()));
            }
            self.multi_bulk_len = count as usize;
            self.argv = Vec::with_capacity(count as usize);
        }

        while self.multi_bulk_len > 0 {
            // Read the `$<len>` header if the current element's length is unknown
            if self.bulk_len.is_none() {
                let line = match read_line(buf) {
                    LineStatus::Complete(end) => end,
                    LineStatus::Incomplete => {
                        if buf.len() > self.max_inline {
                            buf.clear();
                            return Err(ProtocolError::InvalidBulkLength);
                        }
                        return Ok(None);
                    }
                };

                if buf[0] != b'$' {
                    // Leave the bytes in place; they are re-read as the start
                    // of a fresh request on the next pass
                    return Err(ProtocolError::ExpectedBulkHeader(buf[0]));
                }
                let len = match parse_int(&buf[1..line]) {
                    Some(n) if n >= 0 && n <= self.max_bulk as i64 => n as usize,
                    _ => return Err(ProtocolError::InvalidBulkLength),
                };
                buf.advance(line + 2);
                self.bulk_len = Some(len);
            }

            // Read the element payload plus its trailing CRLF
            let len = self.bulk_len.unwrap();
            if buf.len() < len + 2 {
                return Ok(None);
            }
            let data = buf.split_to(len).freeze();
            buf.advance(2);
            self.argv.push(data);
            self.bulk_len = None;
            self.multi_bulk_len -= 1;
        }

        Ok(Some(std::mem::take(&mut self.argv)))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

enum LineStatus {
    /// Index of the `\r` terminating the line; the `\n` after it is present
    Complete(usize),
    Incomplete,
}

/// Find the CR of the first CRLF-terminated line in `buf`.
fn read_line(buf: &[u8]) -> LineStatus {
    match buf.iter().position(|&b| b == b'\r') {
        Some(cr) if cr + 1 < buf.len() => LineStatus::Complete(cr),
        _ => LineStatus::Incomplete,
    }
}

/// Strict decimal integer parse; rejects empty input and stray bytes.
fn parse_int(digits: &[u8]) -> Option<i64> {
    let (neg, digits) = match digits.first() {
        Some(b'-') => (true, &digits[1..]),
        _ => (false, digits),
    };
    if digits.is_empty() || digits.len() > 18 {
        return None;
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as i64;
    }
    Some(if neg { -value } else { value })
}

/// Split an inline request line into arguments with shell-like quoting.
///
/// Unquoted whitespace separates tokens; double-quoted tokens support
/// `\n` `\r` `\t` `\b` `\a` `\xHH` and backslash escapes; single-quoted
/// tokens are literal except for `\'`. Zero-length tokens are dropped.
pub(crate) fn split_inline_args(line: &[u8]) -> Result<Vec<Bytes>, ProtocolError> {
    let mut args = Vec::new();
    let mut i = 0;

    while i < line.len() {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= line.len() {
            break;
        }

        let mut token = Vec::new();
        if line[i] == b'"' {
            i += 1;
            loop {
                if i >= line.len() {
                    return Err(ProtocolError::UnbalancedQuotes);
                }
                match line[i] {
                    b'\\' if i + 1 < line.len() => {
                        i += 1;
                        if line[i] == b'x'
                            && i + 2 < line.len()
                            && line[i + 1].is_ascii_hexdigit()
                            && line[i + 2].is_ascii_hexdigit()
                        {
                            token.push(hex_digit(line[i + 1]) * 16 + hex_digit(line[i + 2]));
                            i += 3;
                        } else {
                            token.push(match line[i] {
                                b'n' => b'\n',
                                b'r' => b'\r',
                                b't' => b'\t',
                                b'b' => 0x08,
                                b'a' => 0x07,
                                other => other,
                            });
                            i += 1;
                        }
                    }
                    b'"' => {
                        // Closing quote must be followed by whitespace or end
                        if i + 1 < line.len() && !line[i + 1].is_ascii_whitespace() {
                            return Err(ProtocolError::UnbalancedQuotes);
                        }
                        i += 1;
                        break;
                    }
                    b => {
                        token.push(b);
                        i += 1;
                    }
                }
            }
        } else if line[i] == b'\'' {
            i += 1;
            loop {
                if i >= line.len() {
                    return Err(ProtocolError::UnbalancedQuotes);
                }
                match line[i] {
                    b'\\' if i + 1 < line.len() && line[i + 1] == b'\'' => {
                        token.push(b'\'');
                        i += 2;
                    }
                    b'\'' => {
                        if i + 1 < line.len() && !line[i + 1].is_ascii_whitespace() {
                            return Err(ProtocolError::UnbalancedQuotes);
                        }
                        i += 1;
                        break;
                    }
                    b => {
                        token.push(b);
                        i += 1;
                    }
                }
            }
        } else {
            while i < line.len() && !line[i].is_ascii_whitespace() {
                token.push(line[i]);
                i += 1;
            }
        }

        if !token.is_empty() {
            args.push(Bytes::from(token));
        }
    }

    Ok(args)
}

fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}
