//! RESP Protocol Implementation
//!
//! The codec converts raw bytes into [`RespValue`]s and back. It knows nothing
//! about commands or storage.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and serialization
//! - `parser`: Incremental parser plus the strict [`decode`] entry point
//!
//! ## Example
//!
//! ```
//! use tidekv::protocol::{decode, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (_request, consumed) = decode(data).unwrap();
//! assert_eq!(consumed, data.len());
//!
//! let response = RespValue::bulk_string(Bytes::from("tide"));
//! assert_eq!(response.serialize(), b"$4\r\ntide\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{decode, parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
