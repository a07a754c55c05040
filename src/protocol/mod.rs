//! RESP Protocol
//!
//! Framing for the command connection: [`parse_message`] turns incoming bytes
//! into [`RespValue`]s and [`RespValue::serialize`] turns replies back into
//! bytes.
//!
//! - `types`: the `RespValue` enum and its wire encoding
//! - `parser`: incremental parser that tolerates partial reads
//!
//! ```
//! use chronokv::protocol::{parse_message, RespValue};
//!
//! let (value, consumed) = parse_message(b"*2\r\n$3\r\nTTL\r\n$3\r\nfoo\r\n")
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(value, RespValue::command(["TTL", "foo"]));
//! assert_eq!(consumed, 22);
//!
//! assert_eq!(RespValue::integer(-2).serialize(), b":-2\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, MAX_BULK_SIZE, MAX_INLINE_SIZE};
pub use types::RespValue;
