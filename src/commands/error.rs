//! Command Errors
//!
//! Every rejected command maps to one of these. The `Display` text is the
//! exact RESP error line sent to the client, so rendering is just
//! `RespValue::Error(err.to_string())`.

use crate::protocol::RespValue;
use thiserror::Error;

/// Why a command was rejected. A rejected command never changes the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR invalid command format")]
    InvalidFormat,
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::Error(err.to_string())
    }
}

pub type CommandResult = Result<RespValue, CommandError>;
