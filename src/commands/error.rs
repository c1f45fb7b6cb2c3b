//! Command errors.
//!
//! The `Display` text of each variant is exactly what the client receives in
//! the error reply, so every message starts with an error-kind token.

use crate::protocol::RespValue;
use crate::storage::StorageError;
use thiserror::Error;

/// Everything that can go wrong between receiving a request and replying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The frame could not be decoded, or had bytes after the request
    #[error("ERR invalid protocol")]
    InvalidProtocol,

    /// The request was not a non-empty array with a string command name
    #[error("ERR invalid request, expected non-empty array of strings")]
    InvalidRequest,

    /// An argument was not a string
    #[error("ERR invalid argument type")]
    InvalidArgumentType,

    #[error("ERR invalid command '{0}'")]
    UnknownCommand(String),

    #[error("ERR invalid number of arguments for '{0}'")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    /// A recognized option shape with a name this server does not support
    #[error("ERR unimplemented option '{0}'")]
    Unimplemented(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is out of range, must be positive")]
    NegativeCount,

    #[error("ERR timeout is not a float or out of range")]
    NotAFloat,

    #[error("ERR timeout is negative")]
    NegativeTimeout,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),
}

impl From<StorageError> for CommandError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::WrongType { .. } => CommandError::WrongType,
        }
    }
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::Error(err.to_string())
    }
}
