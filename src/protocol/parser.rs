//! RESP Protocol Parser
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - Successfully parsed a value, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the message is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! The incremental form is what the connection layer needs: TCP may deliver
//! half a frame, or several frames at once. [`decode`] is the strict form for
//! callers that already hold a complete frame; there, missing bytes are an
//! error like any other framing problem.
//!
//! Exactly one top-level value is consumed per call. Bytes after it are left
//! for the caller to inspect.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The input buffer is empty
    #[error("empty input")]
    EmptyInput,

    /// The frame ended before the value was complete
    #[error("incomplete frame")]
    Incomplete,

    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Length fields take an optional `-` only, never `+`
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

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

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Upper bound on the capacity reserved up front for an array. The declared
/// count comes from the client and is not trusted for allocation.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// An incremental RESP protocol parser.
///
/// # Example
///
/// ```
/// use tidekv::protocol::{RespParser, RespValue};
/// use bytes::Bytes;
///
/// let mut parser = RespParser::new();
/// let (value, consumed) = parser.parse(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
/// assert_eq!(value, RespValue::Array(vec![RespValue::BulkString(Bytes::from("PING"))]));
/// assert_eq!(consumed, 14);
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current nesting depth (for array parsing)
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse a RESP value from the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((value, consumed)))` - Successfully parsed a value
    /// - `Ok(None)` - Incomplete data, need more bytes
    /// - `Err(e)` - Parse error
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_simple_string(buf),
            prefix::ERROR => self.parse_error(buf),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses a simple string: `+<string>\r\n`
    fn parse_simple_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::SIMPLE_STRING);

        Ok(parse_text_line(buf)?.map(|(s, consumed)| (RespValue::SimpleString(s), consumed)))
    }

    /// Parses an error: `-<error message>\r\n`
    fn parse_error(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::ERROR);

        Ok(parse_text_line(buf)?.map(|(s, consumed)| (RespValue::Error(s), consumed)))
    }

    /// Parses an integer: `:<integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::INTEGER);

        let Some(pos) = find_line_end(&buf[1..])? else {
            return Ok(None);
        };

        let s = std::str::from_utf8(&buf[1..1 + pos])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
        let n: i64 = s
            .parse()
            .map_err(|_| ParseError::InvalidInteger(s.to_string()))?;

        Ok(Some((RespValue::Integer(n), 1 + pos + 2)))
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::BULK_STRING);

        let Some(length_end) = find_line_end(&buf[1..])? else {
            return Ok(None);
        };
        let length = parse_length(&buf[1..1 + length_end])?;

        if length == -1 {
            return Ok(Some((RespValue::NullBulkString, 1 + length_end + 2)));
        }

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;

        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let data_start = 1 + length_end + 2;
        let total_needed = data_start + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }

        if &buf[data_start + length..total_needed] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);

        Ok(Some((RespValue::BulkString(data), total_needed)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::ARRAY);

        let Some(count_end) = find_line_end(&buf[1..])? else {
            return Ok(None);
        };
        let count = parse_length(&buf[1..1 + count_end])?;

        if count == -1 {
            return Ok(Some((RespValue::NullArray, 1 + count_end + 2)));
        }

        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
        let mut consumed = 1 + count_end + 2;

        self.depth += 1;

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }

            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None),
            }
        }

        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Finds the end of a header line.
///
/// Returns the position of the first `\r`, which must be followed by `\n`.
/// `Ok(None)` means the terminator has not arrived yet.
#[inline]
fn find_line_end(buf: &[u8]) -> ParseResult<Option<usize>> {
    let Some(pos) = buf.iter().position(|&b| b == b'\r') else {
        return Ok(None);
    };

    match buf.get(pos + 1) {
        None => Ok(None),
        Some(b'\n') => Ok(Some(pos)),
        Some(_) => Err(ParseError::ProtocolError(
            "expected LF after CR".to_string(),
        )),
    }
}

/// Parses the text of a simple string or error line, prefix included in `buf`.
fn parse_text_line(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    let Some(pos) = find_line_end(&buf[1..])? else {
        return Ok(None);
    };

    let s = std::str::from_utf8(&buf[1..1 + pos])
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    // +1 for prefix, +2 for CRLF
    Ok(Some((s.to_string(), 1 + pos + 2)))
}

/// Parses a bulk or array length. Unlike `:` integers, a `+` sign is rejected.
fn parse_length(line: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    if s.starts_with('+') {
        return Err(ParseError::InvalidLength(s.to_string()));
    }

    s.parse()
        .map_err(|_| ParseError::InvalidLength(s.to_string()))
}

/// Helper function to parse a single RESP message from bytes.
///
/// Incomplete input yields `Ok(None)`.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

/// Decodes exactly one value from a buffer that should hold a complete frame.
///
/// Returns the value and the number of bytes consumed. Trailing bytes are not
/// an error here; callers that expect a single frame compare `consumed` with
/// the buffer length.
pub fn decode(buf: &[u8]) -> ParseResult<(RespValue, usize)> {
    if buf.is_empty() {
        return Err(ParseError::EmptyInput);
    }
    parse_message(buf)?.ok_or(ParseError::Incomplete)
}
