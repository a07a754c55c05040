//! Expiry Option Parsing
//!
//! Turns the trailing words of `SET`, `GETEX` and the `EXPIRE` family into
//! typed [`ExpiryUpdate`]s before anything touches the store. Keywords are
//! case-insensitive.
//!
//! Parsing happens in two steps:
//! 1. Syntax: [`SetArgs::parse`] / [`GetExArgs::parse`] read keywords and
//!    integers into an [`ExpiryDirective`]. No clock involved.
//! 2. Resolution: [`ExpiryDirective::resolve`] checks ranges against the
//!    current time and produces the [`ExpiryUpdate`] the engine applies.

use crate::commands::error::CommandError;
use crate::protocol::RespValue;
use crate::storage::{ExpiryUpdate, SetCondition, SetOptions};
use bytes::Bytes;
use std::time::Duration;

/// An expiry keyword and its raw argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDirective {
    /// `EX seconds`
    Ex(i64),
    /// `PX milliseconds`
    Px(i64),
    /// `EXAT unix-seconds`
    ExAt(i64),
    /// `PXAT unix-milliseconds`
    PxAt(i64),
    /// `KEEPTTL` (SET only)
    KeepTtl,
    /// `PERSIST` (GETEX only)
    Persist,
}

impl ExpiryDirective {
    /// Converts to an engine update as of `now_ms`.
    ///
    /// All four numeric forms must be positive. Relative forms must not
    /// overflow when added to `now_ms`. Absolute forms may lie in the past.
    pub fn resolve(self, now_ms: u64, command: &'static str) -> Result<ExpiryUpdate, CommandError> {
        let invalid = || CommandError::InvalidExpireTime(command);

        match self {
            ExpiryDirective::KeepTtl => Ok(ExpiryUpdate::Keep),
            ExpiryDirective::Persist => Ok(ExpiryUpdate::Persist),
            ExpiryDirective::Ex(n) | ExpiryDirective::Px(n) | ExpiryDirective::ExAt(n) | ExpiryDirective::PxAt(n)
                if n <= 0 =>
            {
                Err(invalid())
            }
            ExpiryDirective::Ex(secs) => {
                let ms = seconds_to_millis(secs).ok_or_else(invalid)?;
                relative(now_ms, ms).ok_or_else(invalid)
            }
            ExpiryDirective::Px(ms) => relative(now_ms, ms as u64).ok_or_else(invalid),
            ExpiryDirective::ExAt(secs) => {
                let ms = seconds_to_millis(secs).ok_or_else(invalid)?;
                Ok(ExpiryUpdate::At(ms))
            }
            ExpiryDirective::PxAt(ms) => Ok(ExpiryUpdate::At(ms as u64)),
        }
    }
}

fn seconds_to_millis(secs: i64) -> Option<u64> {
    u64::try_from(secs).ok()?.checked_mul(1000)
}

fn relative(now_ms: u64, ms: u64) -> Option<ExpiryUpdate> {
    now_ms.checked_add(ms)?;
    Some(ExpiryUpdate::After(Duration::from_millis(ms)))
}

/// Parsed trailing options of `SET key value ...`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetArgs {
    pub condition: SetCondition,
    pub return_previous: bool,
    pub expiry: Option<ExpiryDirective>,
}

impl SetArgs {
    /// Parses `[NX|XX] [GET] [EX s|PX ms|EXAT ts|PXAT ts-ms|KEEPTTL]` in any order.
    pub fn parse(options: &[RespValue]) -> Result<Self, CommandError> {
        let mut parsed = SetArgs::default();
        let mut words = options.iter();

        while let Some(word) = words.next() {
            let keyword = keyword(word)?;
            match keyword.as_str() {
                "NX" | "XX" => {
                    if parsed.condition != SetCondition::Always {
                        return Err(CommandError::Syntax);
                    }
                    parsed.condition = if keyword == "NX" {
                        SetCondition::IfAbsent
                    } else {
                        SetCondition::IfPresent
                    };
                }
                "GET" => parsed.return_previous = true,
                "KEEPTTL" => set_once(&mut parsed.expiry, ExpiryDirective::KeepTtl)?,
                "EX" | "PX" | "EXAT" | "PXAT" => {
                    let directive = timed_directive(&keyword, words.next())?;
                    set_once(&mut parsed.expiry, directive)?;
                }
                _ => return Err(CommandError::Syntax),
            }
        }

        Ok(parsed)
    }

    /// Resolves into engine options as of `now_ms`.
    ///
    /// No directive means the write clears any previous expiry.
    pub fn into_options(self, now_ms: u64) -> Result<SetOptions, CommandError> {
        let expiry = match self.expiry {
            Some(directive) => directive.resolve(now_ms, "set")?,
            None => ExpiryUpdate::Persist,
        };

        Ok(SetOptions {
            condition: self.condition,
            expiry,
            return_previous: self.return_previous,
        })
    }
}

/// Parsed trailing options of `GETEX key ...`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetExArgs {
    pub expiry: Option<ExpiryDirective>,
}

impl GetExArgs {
    /// Parses at most one of `EX s|PX ms|EXAT ts|PXAT ts-ms|PERSIST`.
    pub fn parse(options: &[RespValue]) -> Result<Self, CommandError> {
        let mut parsed = GetExArgs::default();
        let mut words = options.iter();

        while let Some(word) = words.next() {
            let keyword = keyword(word)?;
            let directive = match keyword.as_str() {
                "PERSIST" => ExpiryDirective::Persist,
                "EX" | "PX" | "EXAT" | "PXAT" => timed_directive(&keyword, words.next())?,
                _ => return Err(CommandError::Syntax),
            };
            set_once(&mut parsed.expiry, directive)?;
        }

        Ok(parsed)
    }

    /// The update to apply as of `now_ms`. No directive is a pure read.
    pub fn update(self, now_ms: u64) -> Result<ExpiryUpdate, CommandError> {
        match self.expiry {
            Some(directive) => directive.resolve(now_ms, "getex"),
            None => Ok(ExpiryUpdate::Keep),
        }
    }
}

/// Unit of the argument taken by `EXPIRE`, `PEXPIRE`, `EXPIREAT`, `PEXPIREAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireForm {
    Seconds,
    Millis,
    UnixSeconds,
    UnixMillis,
}

impl ExpireForm {
    /// Converts an `EXPIRE`-family argument into an update as of `now_ms`.
    ///
    /// Unlike SET, a non-positive duration or past instant is accepted and
    /// resolves to an instant that has already passed, which deletes the key.
    pub fn resolve(self, amount: i64, now_ms: u64, command: &'static str) -> Result<ExpiryUpdate, CommandError> {
        let invalid = || CommandError::InvalidExpireTime(command);

        let ms = match self {
            ExpireForm::Seconds | ExpireForm::UnixSeconds => {
                amount.checked_mul(1000).ok_or_else(invalid)?
            }
            ExpireForm::Millis | ExpireForm::UnixMillis => amount,
        };

        match self {
            ExpireForm::Seconds | ExpireForm::Millis if ms <= 0 => Ok(ExpiryUpdate::At(now_ms)),
            ExpireForm::Seconds | ExpireForm::Millis => relative(now_ms, ms as u64).ok_or_else(invalid),
            ExpireForm::UnixSeconds | ExpireForm::UnixMillis => {
                Ok(ExpiryUpdate::At(u64::try_from(ms).unwrap_or(0)))
            }
        }
    }
}

fn set_once(slot: &mut Option<ExpiryDirective>, directive: ExpiryDirective) -> Result<(), CommandError> {
    if slot.is_some() {
        return Err(CommandError::Syntax);
    }
    *slot = Some(directive);
    Ok(())
}

fn timed_directive(keyword: &str, value: Option<&RespValue>) -> Result<ExpiryDirective, CommandError> {
    let n = integer_arg(value.ok_or(CommandError::Syntax)?)?;
    Ok(match keyword {
        "EX" => ExpiryDirective::Ex(n),
        "PX" => ExpiryDirective::Px(n),
        "EXAT" => ExpiryDirective::ExAt(n),
        _ => ExpiryDirective::PxAt(n),
    })
}

fn keyword(value: &RespValue) -> Result<String, CommandError> {
    value
        .as_str()
        .map(str::to_ascii_uppercase)
        .ok_or(CommandError::Syntax)
}

/// Reads a key or value argument.
pub fn bytes_arg(value: &RespValue) -> Result<Bytes, CommandError> {
    match value {
        RespValue::BulkString(b) => Ok(b.clone()),
        RespValue::SimpleString(s) => Ok(Bytes::from(s.clone())),
        _ => Err(CommandError::InvalidFormat),
    }
}

/// Reads a signed 64-bit integer argument.
pub fn integer_arg(value: &RespValue) -> Result<i64, CommandError> {
    match value {
        RespValue::Integer(n) => Ok(*n),
        other => other
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or(CommandError::NotAnInteger),
    }
}
