//! Streaming request decoder.
//!
//! Requests arrive in a small subset of the RESP framing rules. A frame is
//! one of:
//!
//! - an array of bulk or simple strings: `*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n`
//! - a bare simple line: `+PING\r\n`
//! - a bare bulk string: `$4\r\nPING\r\n`
//!
//! Decoding is strict. Every line must end in `\r\n` (a lone `\n` or a `\r`
//! followed by anything else is rejected), length prefixes must be plain
//! decimal with `-1` as the only permitted negative, and payloads must be
//! valid UTF-8. A null bulk (`$-1`) decodes to an empty string when it
//! appears as an array element and to an empty command when it stands alone.
//!
//! The decoder reads directly from the socket and never buffers beyond the
//! frame under construction, so a clean EOF between frames is reported as
//! end-of-stream while an EOF inside a frame is a [`DecodeError::Truncated`].

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest accepted bulk payload (512 MB, same as Redis).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest accepted simple line or length prefix.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Largest accepted element count for a single request array.
pub const MAX_ARRAY_ELEMENTS: usize = 1024 * 1024;

/// Errors produced while decoding a request frame.
///
/// Everything except [`DecodeError::Io`] means the peer violated the
/// protocol; the session drops such connections without a reply.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The connection closed in the middle of a frame.
    #[error("connection closed mid-frame")]
    Truncated,

    /// A type tag byte that no request form starts with.
    #[error("unexpected type tag {0:#04x}")]
    UnexpectedTag(u8),

    /// A line that does not end in `\r\n`.
    #[error("malformed line terminator")]
    BadTerminator,

    /// A length prefix that is not a plain decimal number (or `-1` where a
    /// null bulk is meaningful).
    #[error("invalid length prefix")]
    BadLength,

    /// A declared size beyond what the server is willing to read.
    #[error("declared size {size} exceeds the limit of {max}")]
    TooLarge { size: usize, max: usize },

    /// A payload that is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    BadUtf8,

    /// An I/O failure underneath the decoder.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads one complete command from `reader`.
///
/// Returns `Ok(None)` when the stream ends cleanly at a frame boundary.
/// `Ok(Some(vec![]))` is an empty command (`*0` or a bare `$-1`), which the
/// dispatcher answers with an error; it is not a protocol violation.
pub async fn read_command<R>(reader: &mut R) -> Result<Option<Vec<String>>, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let tag = match reader.read_u8().await {
        Ok(tag) => tag,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(DecodeError::Io(e)),
    };

    let command = match tag {
        b'*' => read_array(reader).await?,
        b'+' => vec![read_line(reader).await?],
        b'$' => match read_bulk(reader).await? {
            Some(part) => vec![part],
            None => Vec::new(),
        },
        other => return Err(DecodeError::UnexpectedTag(other)),
    };

    Ok(Some(command))
}

/// EOF anywhere past the first byte of a frame means the frame was cut short.
fn map_read_err(e: io::Error) -> DecodeError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        DecodeError::Truncated
    } else {
        DecodeError::Io(e)
    }
}

async fn next_byte<R>(reader: &mut R) -> Result<u8, DecodeError>
where
    R: AsyncRead + Unpin,
{
    reader.read_u8().await.map_err(map_read_err)
}

/// Reads bytes up to a strict `\r\n` terminator, excluded from the result.
async fn read_line_bytes<R>(reader: &mut R) -> Result<Vec<u8>, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        match next_byte(reader).await? {
            b'\r' => {
                if next_byte(reader).await? != b'\n' {
                    return Err(DecodeError::BadTerminator);
                }
                return Ok(line);
            }
            b'\n' => return Err(DecodeError::BadTerminator),
            byte => {
                line.push(byte);
                if line.len() > MAX_LINE_LEN {
                    return Err(DecodeError::TooLarge {
                        size: line.len(),
                        max: MAX_LINE_LEN,
                    });
                }
            }
        }
    }
}

async fn read_line<R>(reader: &mut R) -> Result<String, DecodeError>
where
    R: AsyncRead + Unpin,
{
    String::from_utf8(read_line_bytes(reader).await?).map_err(|_| DecodeError::BadUtf8)
}

/// Parses a length line: a plain decimal count, or `-1` mapped to `None`.
async fn read_length<R>(reader: &mut R) -> Result<Option<usize>, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let line = read_line_bytes(reader).await?;
    if line == b"-1" {
        return Ok(None);
    }
    if line.is_empty() || !line.iter().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::BadLength);
    }
    let mut value: usize = 0;
    for &digit in &line {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(usize::from(digit - b'0')))
            .ok_or(DecodeError::BadLength)?;
    }
    Ok(Some(value))
}

/// Reads a bulk string after its `$` tag. `None` is the null bulk.
async fn read_bulk<R>(reader: &mut R) -> Result<Option<String>, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let len = match read_length(reader).await? {
        Some(len) => len,
        None => return Ok(None),
    };
    if len > MAX_BULK_LEN {
        return Err(DecodeError::TooLarge {
            size: len,
            max: MAX_BULK_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(map_read_err)?;
    expect_crlf(reader).await?;
    String::from_utf8(payload).map(Some).map_err(|_| DecodeError::BadUtf8)
}

async fn expect_crlf<R>(reader: &mut R) -> Result<(), DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut terminator = [0u8; 2];
    reader
        .read_exact(&mut terminator)
        .await
        .map_err(map_read_err)?;
    if terminator != *b"\r\n" {
        return Err(DecodeError::BadTerminator);
    }
    Ok(())
}

/// Reads the elements of a request array after its `*` tag.
///
/// Elements may be bulk or simple strings; a null bulk element decodes to
/// an empty string. A negative element count has no meaning in a request.
async fn read_array<R>(reader: &mut R) -> Result<Vec<String>, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let count = read_length(reader).await?.ok_or(DecodeError::BadLength)?;
    if count > MAX_ARRAY_ELEMENTS {
        return Err(DecodeError::TooLarge {
            size: count,
            max: MAX_ARRAY_ELEMENTS,
        });
    }
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let part = match next_byte(reader).await? {
            b'$' => read_bulk(reader).await?.unwrap_or_default(),
            b'+' => read_line(reader).await?,
            other => return Err(DecodeError::UnexpectedTag(other)),
        };
        parts.push(part);
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Option<Vec<String>> {
        Some(parts.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_decode_array_command() {
        let mut input = &b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n"[..];
        let result = read_command(&mut input).await.unwrap();
        assert_eq!(result, cmd(&["ECHO", "hello"]));
    }

    #[tokio::test]
    async fn test_decode_simple_line() {
        let mut input = &b"+PING\r\n"[..];
        assert_eq!(read_command(&mut input).await.unwrap(), cmd(&["PING"]));
    }

    #[tokio::test]
    async fn test_decode_bare_bulk() {
        let mut input = &b"$4\r\nPING\r\n"[..];
        assert_eq!(read_command(&mut input).await.unwrap(), cmd(&["PING"]));
    }

    #[tokio::test]
    async fn test_decode_mixed_element_kinds() {
        let mut input = &b"*3\r\n$3\r\nSET\r\n+key\r\n$5\r\nvalue\r\n"[..];
        let result = read_command(&mut input).await.unwrap();
        assert_eq!(result, cmd(&["SET", "key", "value"]));
    }

    #[tokio::test]
    async fn test_decode_null_bulk_element_becomes_empty_string() {
        let mut input = &b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$-1\r\n"[..];
        let result = read_command(&mut input).await.unwrap();
        assert_eq!(result, cmd(&["SET", "key", ""]));
    }

    #[tokio::test]
    async fn test_decode_bare_null_bulk_is_empty_command() {
        let mut input = &b"$-1\r\n"[..];
        assert_eq!(read_command(&mut input).await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_decode_empty_array_is_empty_command() {
        let mut input = &b"*0\r\n"[..];
        assert_eq!(read_command(&mut input).await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_decode_empty_bulk_element() {
        let mut input = &b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n"[..];
        assert_eq!(read_command(&mut input).await.unwrap(), cmd(&["ECHO", ""]));
    }

    #[tokio::test]
    async fn test_decode_eof_at_frame_boundary() {
        let mut input = &b""[..];
        assert_eq!(read_command(&mut input).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decode_pipelined_frames() {
        let mut input = &b"+PING\r\n*1\r\n$4\r\nPING\r\n"[..];
        assert_eq!(read_command(&mut input).await.unwrap(), cmd(&["PING"]));
        assert_eq!(read_command(&mut input).await.unwrap(), cmd(&["PING"]));
        assert_eq!(read_command(&mut input).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decode_eof_mid_array() {
        let mut input = &b"*2\r\n$3\r\nGET\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::Truncated)));
    }

    #[tokio::test]
    async fn test_decode_eof_inside_payload() {
        let mut input = &b"$5\r\nab"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::Truncated)));
    }

    #[tokio::test]
    async fn test_decode_unknown_tag() {
        let mut input = &b":5\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::UnexpectedTag(b':'))));
    }

    #[tokio::test]
    async fn test_decode_unknown_tag_inside_array() {
        let mut input = &b"*1\r\n:5\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::UnexpectedTag(b':'))));
    }

    #[tokio::test]
    async fn test_decode_bare_lf_rejected() {
        let mut input = &b"+PING\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::BadTerminator)));
    }

    #[tokio::test]
    async fn test_decode_cr_without_lf_rejected() {
        let mut input = &b"+OK\rX\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::BadTerminator)));
    }

    #[tokio::test]
    async fn test_decode_payload_missing_terminator() {
        let mut input = &b"*1\r\n$3\r\nfooXY"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::BadTerminator)));
    }

    #[tokio::test]
    async fn test_decode_negative_bulk_length() {
        let mut input = &b"*2\r\n$3\r\nGET\r\n$-5\r\nhello\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::BadLength)));
    }

    #[tokio::test]
    async fn test_decode_negative_array_count() {
        let mut input = &b"*-1\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::BadLength)));
    }

    #[tokio::test]
    async fn test_decode_length_with_sign_rejected() {
        let mut input = &b"$+3\r\nfoo\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::BadLength)));
    }

    #[tokio::test]
    async fn test_decode_non_numeric_length() {
        let mut input = &b"*abc\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::BadLength)));
    }

    #[tokio::test]
    async fn test_decode_oversized_bulk_rejected_without_reading() {
        let mut input = &b"$600000000\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_decode_oversized_array_count() {
        let mut input = &b"*2000000\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn test_decode_invalid_utf8_payload() {
        let mut input = &b"$2\r\n\xff\xfe\r\n"[..];
        let result = read_command(&mut input).await;
        assert!(matches!(result, Err(DecodeError::BadUtf8)));
    }

    #[tokio::test]
    async fn test_decode_frame_split_across_reads() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"*2\r\n$4\r\nEC")
            .read(b"HO\r\n$2\r\nhi\r\n")
            .build();
        let result = read_command(&mut mock).await.unwrap();
        assert_eq!(result, cmd(&["ECHO", "hi"]));
    }

    #[tokio::test]
    async fn test_decode_byte_at_a_time() {
        let frame = b"*1\r\n$4\r\nPING\r\n";
        let mut builder = tokio_test::io::Builder::new();
        for byte in frame {
            builder.read(std::slice::from_ref(byte));
        }
        let mut mock = builder.build();
        assert_eq!(read_command(&mut mock).await.unwrap(), cmd(&["PING"]));
    }
}
