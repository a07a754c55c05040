//! Incremental RESP Parser
//!
//! [`parse_message`] looks at the front of a buffer and returns:
//! - `Ok(Some((value, consumed)))` when a whole value is available
//! - `Ok(None)` when more bytes are needed
//! - `Err(ParseError)` when the bytes can never form a valid value
//!
//! The connection keeps appending socket reads to its buffer and calls the
//! parser until it returns `Ok(None)`.
//!
//! Lines that do not start with a RESP prefix are treated as inline commands
//! (`TTL foo\r\n`), which is what `telnet`/`nc` users type.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of an inline command line (64 KB, same as Redis)
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Why a parse step stopped early.
enum Halt {
    Incomplete,
    Invalid(ParseError),
}

impl From<ParseError> for Halt {
    fn from(e: ParseError) -> Self {
        Halt::Invalid(e)
    }
}

type Step<T> = Result<T, Halt>;

/// A read position over a borrowed buffer.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Returns the bytes up to the next CRLF and moves past it.
    fn line(&mut self) -> Step<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let end = find_crlf(rest).ok_or(Halt::Incomplete)?;
        self.pos += end + CRLF.len();
        Ok(&rest[..end])
    }

    fn take(&mut self, n: usize) -> Step<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(Halt::Incomplete);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn integer(&mut self) -> Step<i64> {
        let line = self.line()?;
        let text = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8("integer"))?;
        text.parse()
            .map_err(|_| Halt::Invalid(ParseError::InvalidInteger(text.to_string())))
    }

    fn text(&mut self, what: &'static str) -> Step<String> {
        let line = self.line()?;
        std::str::from_utf8(line)
            .map(str::to_string)
            .map_err(|_| Halt::Invalid(ParseError::InvalidUtf8(what)))
    }
}

/// Attempts to parse one value from the front of `buf`.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor { buf, pos: 0 };
    let result = match buf[0] {
        prefix::SIMPLE_STRING
        | prefix::ERROR
        | prefix::INTEGER
        | prefix::BULK_STRING
        | prefix::ARRAY => parse_value(&mut cursor, 0),
        _ => parse_inline(&mut cursor),
    };

    match result {
        Ok(value) => Ok(Some((value, cursor.pos))),
        Err(Halt::Incomplete) => Ok(None),
        Err(Halt::Invalid(e)) => Err(e),
    }
}

fn parse_value(cursor: &mut Cursor<'_>, depth: usize) -> Step<RespValue> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::ProtocolError(format!(
            "maximum nesting depth exceeded: {MAX_NESTING_DEPTH}"
        ))
        .into());
    }

    let tag = cursor.take(1)?[0];
    match tag {
        prefix::SIMPLE_STRING => Ok(RespValue::SimpleString(cursor.text("simple string")?)),
        prefix::ERROR => Ok(RespValue::Error(cursor.text("error")?)),
        prefix::INTEGER => Ok(RespValue::Integer(cursor.integer()?)),
        prefix::BULK_STRING => parse_bulk(cursor),
        prefix::ARRAY => parse_array(cursor, depth),
        other => Err(ParseError::ProtocolError(format!("unknown type prefix: {other:#04x}")).into()),
    }
}

fn parse_bulk(cursor: &mut Cursor<'_>) -> Step<RespValue> {
    let len = cursor.integer()?;
    if len == -1 {
        return Ok(RespValue::Null);
    }
    let len = usize::try_from(len).map_err(|_| ParseError::InvalidBulkLength(len))?;
    if len > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        }
        .into());
    }

    let data = cursor.take(len)?;
    if cursor.take(CRLF.len())? != CRLF {
        return Err(ParseError::ProtocolError("bulk string missing trailing CRLF".to_string()).into());
    }
    Ok(RespValue::BulkString(Bytes::copy_from_slice(data)))
}

fn parse_array(cursor: &mut Cursor<'_>, depth: usize) -> Step<RespValue> {
    let count = cursor.integer()?;
    if count == -1 {
        return Ok(RespValue::Null);
    }
    let count = usize::try_from(count).map_err(|_| ParseError::InvalidArrayLength(count))?;

    // Each element needs at least 3 bytes, so cap the preallocation by what
    // the buffer could possibly hold.
    let mut elements = Vec::with_capacity(count.min(cursor.buf.len() / 3));
    for _ in 0..count {
        elements.push(parse_value(cursor, depth + 1)?);
    }
    Ok(RespValue::Array(elements))
}

fn parse_inline(cursor: &mut Cursor<'_>) -> Step<RespValue> {
    let line = match cursor.line() {
        Err(Halt::Incomplete) if cursor.buf.len() > MAX_INLINE_SIZE => {
            return Err(ParseError::MessageTooLarge {
                size: cursor.buf.len(),
                max: MAX_INLINE_SIZE,
            }
            .into());
        }
        other => other?,
    };
    if line.len() > MAX_INLINE_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: line.len(),
            max: MAX_INLINE_SIZE,
        }
        .into());
    }
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8("inline command"))?;

    let words: Vec<RespValue> = line
        .split_whitespace()
        .map(|w| RespValue::BulkString(Bytes::copy_from_slice(w.as_bytes())))
        .collect();

    if words.is_empty() {
        return Err(ParseError::ProtocolError("empty inline command".to_string()).into());
    }
    Ok(RespValue::Array(words))
}

#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
