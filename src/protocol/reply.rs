//! Reply values and their wire encoding.
//!
//! A [`Reply`] is the abstract result of one dispatched command. Encoding is
//! the inverse of the request decoder's lexical rules: one type tag byte,
//! CRLF-terminated lines, and length-prefixed payloads.

use bytes::Bytes;

/// Line terminator used throughout the wire protocol.
const CRLF: &[u8] = b"\r\n";

/// A single reply frame sent back to the client.
///
/// Replies form a small tree: an `Array` contains nested replies, everything
/// else is a leaf. `Null` is the null bulk string (`$-1\r\n`) and is distinct
/// from an empty `Bulk`, which still carries a zero-length payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A bare text line: `+text\r\n`
    Simple(String),
    /// An error line: `-message\r\n`
    Error(String),
    /// A signed integer: `:n\r\n`
    Integer(i64),
    /// A length-prefixed byte string: `$len\r\n<bytes>\r\n`
    Bulk(Bytes),
    /// The null bulk string: `$-1\r\n`
    Null,
    /// A counted sequence of nested replies: `*count\r\n...`
    Array(Vec<Reply>),
}

impl Reply {
    /// The canonical `+OK` reply.
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    pub fn simple(text: impl Into<String>) -> Self {
        Reply::Simple(text.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    pub fn bulk(payload: impl Into<Bytes>) -> Self {
        Reply::Bulk(payload.into())
    }

    pub fn array(items: Vec<Reply>) -> Self {
        Reply::Array(items)
    }

    /// Encodes the reply into a freshly allocated buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    /// Encodes the reply by appending to `buf`, so a session can reuse one
    /// write buffer across commands.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Simple(text) => {
                buf.push(b'+');
                buf.extend_from_slice(text.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(message) => {
                buf.push(b'-');
                buf.extend_from_slice(message.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(payload) => {
                buf.push(b'$');
                buf.extend_from_slice(payload.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(payload);
                buf.extend_from_slice(CRLF);
            }
            Reply::Null => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            Reply::Array(items) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }
}
