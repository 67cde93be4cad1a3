//! RESP Frames and Outgoing Commands
//!
//! The primary backend speaks RESP2. Requests always go out as an array of
//! bulk strings (built with [`Command`]); replies come back as any of the
//! five frame kinds below.
//!
//! ## Wire Format
//!
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-WRONGTYPE Operation against a key\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n` (null: `$-1\r\n`)
//! - `*` Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n` (null: `*-1\r\n`)

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    /// Null bulk string or null array
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Writes the frame in wire format.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => write_bulk(buf, data),
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.write_to(buf);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Returns the payload of a bulk or simple string.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(data) => Some(data),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(values) => Some(values),
            _ => None,
        }
    }
}

fn write_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

fn write_bulk(buf: &mut BytesMut, data: &[u8]) {
    write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => write!(f, "(array, {} items)", values.len()),
        }
    }
}

/// An outgoing request: a command name followed by bulk-string arguments.
///
/// # Example
///
/// ```
/// use standbykv::protocol::Command;
///
/// let cmd = Command::new("SET").arg("user:101").arg("Ariz").arg("EX").arg_int(300);
/// assert_eq!(cmd.name(), "SET");
/// assert_eq!(
///     &cmd.encode()[..],
///     &b"*5\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n$2\r\nEX\r\n$3\r\n300\r\n"[..]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a borrowed argument, copying it.
    pub fn arg_slice(self, arg: &[u8]) -> Self {
        self.arg(Bytes::copy_from_slice(arg))
    }

    pub fn arg_int(self, n: i64) -> Self {
        self.arg(n.to_string())
    }

    /// Appends a score; infinities are written as `inf` / `-inf`.
    pub fn arg_score(self, score: f64) -> Self {
        self.arg(score.to_string())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        write_line(buf, prefix::ARRAY, (self.args.len() + 1).to_string().as_bytes());
        write_bulk(buf, self.name.as_bytes());
        for arg in &self.args {
            write_bulk(buf, arg);
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }
}
