//! Incremental RESP Parser
//!
//! Frames are parsed straight out of a `BytesMut` read buffer. The parser
//! returns:
//! - `Ok(Some(frame))` - a complete frame, already split off the buffer
//! - `Ok(None)` - the frame is incomplete and the buffer is untouched
//! - `Err(ParseError)` - the stream is corrupt and the connection should be dropped

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer in a length or integer frame
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8 in line")]
    InvalidUtf8,

    /// Negative length other than -1
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Splits one complete frame off the front of `buf`.
pub fn decode_frame(buf: &mut BytesMut) -> ParseResult<Option<RespValue>> {
    match parse_frame(&buf[..], 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Parses one frame from the front of `buf` without consuming it.
///
/// Returns the frame and the number of bytes it occupies.
pub fn parse_frame(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::ProtocolError(format!(
            "maximum nesting depth exceeded: {}",
            MAX_NESTING_DEPTH
        )));
    }

    let (line, header_len) = match read_line(&buf[1..]) {
        Some(pos) => (&buf[1..1 + pos], 1 + pos + CRLF.len()),
        None => return Ok(None),
    };

    match buf[0] {
        prefix::SIMPLE_STRING => Ok(Some((RespValue::SimpleString(utf8(line)?), header_len))),
        prefix::ERROR => Ok(Some((RespValue::Error(utf8(line)?), header_len))),
        prefix::INTEGER => Ok(Some((RespValue::Integer(integer(line)?), header_len))),
        prefix::BULK_STRING => {
            let len = match length(line)? {
                Some(len) => len,
                None => return Ok(Some((RespValue::Null, header_len))),
            };
            if len > MAX_BULK_SIZE {
                return Err(ParseError::MessageTooLarge {
                    size: len,
                    max: MAX_BULK_SIZE,
                });
            }

            let total = header_len + len + CRLF.len();
            if buf.len() < total {
                return Ok(None);
            }
            if &buf[header_len + len..total] != CRLF {
                return Err(ParseError::ProtocolError(
                    "bulk string missing trailing CRLF".to_string(),
                ));
            }
            let data = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
            Ok(Some((RespValue::BulkString(data), total)))
        }
        prefix::ARRAY => {
            let count = match length(line)? {
                Some(count) => count,
                None => return Ok(Some((RespValue::Null, header_len))),
            };

            let mut elements = Vec::with_capacity(count.min(1024));
            let mut consumed = header_len;
            for _ in 0..count {
                match parse_frame(&buf[consumed..], depth + 1)? {
                    Some((value, used)) => {
                        elements.push(value);
                        consumed += used;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(elements), consumed)))
        }
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// Position of the first CRLF in `buf`.
#[inline]
fn read_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == CRLF)
}

fn utf8(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| ParseError::InvalidUtf8)
}

fn integer(line: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

/// A length header; `None` for the `-1` null marker.
fn length(line: &[u8]) -> ParseResult<Option<usize>> {
    match integer(line)? {
        -1 => Ok(None),
        n if n < 0 => Err(ParseError::InvalidLength(n)),
        n => Ok(Some(n as usize)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Command;

    fn decode(input: &[u8]) -> ParseResult<Option<RespValue>> {
        let mut buf = BytesMut::from(input);
        decode_frame(&mut buf)
    }

    #[test]
    fn test_scalar_replies() {
        assert_eq!(
            decode(b"+PONG\r\n"),
            Ok(Some(RespValue::SimpleString("PONG".into())))
        );
        assert_eq!(
            decode(b"-WRONGTYPE Operation against a key\r\n"),
            Ok(Some(RespValue::Error(
                "WRONGTYPE Operation against a key".into()
            )))
        );
        assert_eq!(decode(b":-42\r\n"), Ok(Some(RespValue::Integer(-42))));
        assert_eq!(decode(b"$-1\r\n"), Ok(Some(RespValue::Null)));
        assert_eq!(decode(b"*-1\r\n"), Ok(Some(RespValue::Null)));
        assert_eq!(decode(b"$0\r\n\r\n"), Ok(Some(RespValue::bulk(""))));
    }

    #[test]
    fn test_incomplete_frames_leave_buffer_intact() {
        for input in [
            &b"+OK"[..],
            &b"$5\r\nhel"[..],
            &b"$5\r\nhello\r"[..],
            &b"*2\r\n$3\r\nfoo\r\n"[..],
            &b"*2\r\n"[..],
        ] {
            let mut buf = BytesMut::from(input);
            assert_eq!(decode_frame(&mut buf), Ok(None));
            assert_eq!(&buf[..], input);
        }
    }

    #[test]
    fn test_consumes_exactly_one_frame() {
        let mut buf = BytesMut::from(&b":1\r\n$3\r\nabc\r\n+OK"[..]);

        assert_eq!(decode_frame(&mut buf), Ok(Some(RespValue::Integer(1))));
        assert_eq!(decode_frame(&mut buf), Ok(Some(RespValue::bulk("abc"))));
        assert_eq!(decode_frame(&mut buf), Ok(None));
        assert_eq!(&buf[..], b"+OK");
    }

    #[test]
    fn test_scan_reply_shape() {
        let input = b"*2\r\n$2\r\n17\r\n*2\r\n$9\r\nsession:a\r\n$9\r\nsession:b\r\n";
        assert_eq!(
            decode(input),
            Ok(Some(RespValue::Array(vec![
                RespValue::bulk("17"),
                RespValue::Array(vec![
                    RespValue::bulk("session:a"),
                    RespValue::bulk("session:b")
                ]),
            ])))
        );
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        assert_eq!(
            decode(b"$5\r\nhel\x00o\r\n"),
            Ok(Some(RespValue::bulk(&b"hel\x00o"[..])))
        );
    }

    #[test]
    fn test_corrupt_input() {
        assert_eq!(decode(b"@oops\r\n"), Err(ParseError::UnknownPrefix(b'@')));
        assert!(matches!(
            decode(b":abc\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert_eq!(decode(b"$-3\r\n"), Err(ParseError::InvalidLength(-3)));
        assert!(matches!(
            decode(b"$3\r\nabcXY"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut input = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert!(matches!(
            decode(&input),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_decodes_encoded_command() {
        let cmd = Command::new("HSET").arg("session:abc").arg("userId").arg("7");
        let mut buf = BytesMut::from(&cmd.encode()[..]);
        assert_eq!(
            decode_frame(&mut buf),
            Ok(Some(RespValue::Array(vec![
                RespValue::bulk("HSET"),
                RespValue::bulk("session:abc"),
                RespValue::bulk("userId"),
                RespValue::bulk("7"),
            ])))
        );
        assert!(buf.is_empty());
    }
}
