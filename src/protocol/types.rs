//! RESP2 Values
//!
//! The subset of the Redis Serialization Protocol chronokv speaks. Requests
//! arrive as arrays of bulk strings; replies use every variant below.
//!
//! | Prefix | Type          | Example              |
//! |--------|---------------|----------------------|
//! | `+`    | Simple String | `+OK\r\n`            |
//! | `-`    | Error         | `-ERR syntax error\r\n` |
//! | `:`    | Integer       | `:-2\r\n`            |
//! | `$`    | Bulk String   | `$3\r\nbar\r\n`      |
//! | `$-1`  | Null          | `$-1\r\n`            |
//! | `*`    | Array         | `*2\r\n$3\r\nTTL\r\n$3\r\nfoo\r\n` |

use bytes::{BufMut, Bytes, BytesMut};

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

/// A value in the RESP protocol, used for both requests and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    /// Null bulk string (`$-1`); also what a null array parses to
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `+OK`
    pub fn ok() -> Self {
        Self::simple_string("OK")
    }

    /// `+PONG`
    pub fn pong() -> Self {
        Self::simple_string("PONG")
    }

    /// `:1` for true, `:0` for false.
    pub fn from_bool(flag: bool) -> Self {
        RespValue::Integer(i64::from(flag))
    }

    /// Bulk string, or null for `None`.
    pub fn from_optional(value: Option<Bytes>) -> Self {
        value.map_or(RespValue::Null, RespValue::BulkString)
    }

    /// Builds a request array from command words, e.g. `["TTL", "foo"]`.
    pub fn command<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        RespValue::Array(
            words
                .into_iter()
                .map(|w| RespValue::BulkString(Bytes::copy_from_slice(w.as_ref())))
                .collect(),
        )
    }

    /// Serializes to wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Appends the wire format to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.write_to(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Inner text of a SimpleString or UTF-8 BulkString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
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
