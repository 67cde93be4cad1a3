//! RESP Client Codec
//!
//! The primary backend is a networked RESP server. This module encodes
//! outgoing commands and decodes reply frames incrementally from a read
//! buffer.
//!
//! ## Modules
//!
//! - `types`: `RespValue` frames and the `Command` builder
//! - `parser`: incremental frame decoder
//!
//! ## Example
//!
//! ```
//! use standbykv::protocol::{decode_frame, Command, RespValue};
//! use bytes::BytesMut;
//!
//! let request = Command::new("GET").arg("name").encode();
//! assert!(request.starts_with(b"*2\r\n$3\r\nGET"));
//!
//! let mut buf = BytesMut::from(&b"$4\r\nAriz\r\n"[..]);
//! assert_eq!(decode_frame(&mut buf).unwrap(), Some(RespValue::bulk("Ariz")));
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{decode_frame, parse_frame, ParseError, ParseResult};
pub use types::{Command, RespValue};
