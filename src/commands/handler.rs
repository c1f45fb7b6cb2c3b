//! Command Handler
//!
//! Validates requests, routes them to the matching command and packages the
//! result (or the failure) as a RESP reply. Nothing fails past this point:
//! every error becomes an error reply.
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `ECHO message [message ...]` - arguments joined by single spaces
//! - `GET key`
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `RPUSH key value [value ...]` / `LPUSH key value [value ...]`
//! - `LRANGE key start stop`
//! - `LLEN key`
//! - `LPOP key [count]`
//! - `BLPOP key [timeout]` - timeout in (fractional) seconds, 0 or absent waits forever
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  validate   │───>│   lookup    │───>│   execute   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                          │         │        │
//! │                                          ▼         ▼        │
//! │                              StorageEngine   BlockingCoordinator
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::blocking::BlockingCoordinator;
use crate::commands::{Command, CommandError};
use crate::protocol::{decode, RespValue};
use crate::storage::{ListEnd, StorageEngine};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

type CommandResult = Result<RespValue, CommandError>;

/// Handles commands by dispatching them to the appropriate handlers.
///
/// Cheap to clone; every connection gets its own clone sharing the same
/// storage and coordinator.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    blocking: Arc<BlockingCoordinator>,
}

impl CommandHandler {
    /// Creates a command handler on top of a shared coordinator and its storage.
    pub fn new(blocking: Arc<BlockingCoordinator>) -> Self {
        Self {
            storage: Arc::clone(blocking.storage()),
            blocking,
        }
    }

    /// Decodes one complete request frame, executes it and encodes the reply.
    ///
    /// A frame that does not decode, or that has bytes left over after the
    /// request, is answered with `ERR invalid protocol` and not executed.
    pub async fn handle_frame(&self, frame: &[u8]) -> Vec<u8> {
        let response = match decode(frame) {
            Ok((request, consumed)) if consumed == frame.len() => self.execute(request).await,
            Ok((_, consumed)) => {
                debug!(trailing = frame.len() - consumed, "trailing bytes after request");
                CommandError::InvalidProtocol.into()
            }
            Err(e) => {
                debug!(error = %e, "undecodable request");
                CommandError::InvalidProtocol.into()
            }
        };
        response.serialize()
    }

    /// Executes a command and returns the response.
    ///
    /// # Arguments
    ///
    /// * `command` - The parsed RESP value (should be an array of strings)
    ///
    /// # Returns
    ///
    /// The RESP response to send back to the client. BLPOP may keep this
    /// future pending until data arrives or its timeout passes.
    pub async fn execute(&self, command: RespValue) -> RespValue {
        match self.route(command).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "command failed");
                e.into()
            }
        }
    }

    async fn route(&self, command: RespValue) -> CommandResult {
        let mut args = match command {
            RespValue::Array(args) if !args.is_empty() => args.into_iter(),
            _ => return Err(CommandError::InvalidRequest),
        };

        let name = args
            .next()
            .and_then(|name| name.to_bytes())
            .ok_or(CommandError::InvalidRequest)?;

        let cmd = Command::lookup(&name).ok_or_else(|| {
            CommandError::UnknownCommand(String::from_utf8_lossy(&name).to_uppercase())
        })?;

        let args = args
            .map(|arg| arg.to_bytes().ok_or(CommandError::InvalidArgumentType))
            .collect::<Result<Vec<Bytes>, _>>()?;

        cmd.check_arity(args.len() + 1)?;
        trace!(command = cmd.name(), argc = args.len(), "executing");

        self.dispatch(cmd, args).await
    }

    /// Dispatches a command to its handler. Arity has already been checked.
    async fn dispatch(&self, cmd: Command, args: Vec<Bytes>) -> CommandResult {
        match cmd {
            Command::Ping => self.cmd_ping(&args),
            Command::Echo => self.cmd_echo(&args),
            Command::Get => self.cmd_get(&args),
            Command::Set => self.cmd_set(&args),
            Command::RPush => self.cmd_push(args, ListEnd::Tail),
            Command::LPush => self.cmd_push(args, ListEnd::Head),
            Command::LRange => self.cmd_lrange(&args),
            Command::LLen => self.cmd_llen(&args),
            Command::LPop => self.cmd_lpop(&args),
            Command::BLPop => self.cmd_blpop(&args).await,
        }
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        Ok(match args.first() {
            Some(msg) => RespValue::bulk_string(msg.clone()),
            None => RespValue::pong(),
        })
    }

    /// ECHO message [message ...]
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        let mut joined = BytesMut::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                joined.extend_from_slice(b" ");
            }
            joined.extend_from_slice(arg);
        }
        Ok(RespValue::bulk_string(joined.freeze()))
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        Ok(match self.storage.get_string(&args[0])? {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::NullBulkString,
        })
    }

    /// SET key value [EX seconds | PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        let key = args[0].clone();
        let value = args[1].clone();

        let mut ttl = None;
        for option in args[2..].chunks(2) {
            let [name, amount] = option else {
                return Err(CommandError::Syntax);
            };

            let millis_per_unit: u64 = match name.to_ascii_uppercase().as_slice() {
                b"EX" => 1000,
                b"PX" => 1,
                _ => {
                    return Err(CommandError::Unimplemented(
                        String::from_utf8_lossy(name).into_owned(),
                    ))
                }
            };

            let amount = parse_integer(amount)?;
            if amount <= 0 {
                return Err(CommandError::InvalidExpireTime("set"));
            }
            ttl = Some(Duration::from_millis(
                (amount as u64).saturating_mul(millis_per_unit),
            ));
        }

        self.storage.set_string(key, value, ttl);
        Ok(RespValue::ok())
    }

    // ========================================================================
    // List Commands
    // ========================================================================

    /// RPUSH / LPUSH key value [value ...]
    fn cmd_push(&self, mut args: Vec<Bytes>, end: ListEnd) -> CommandResult {
        let values = args.split_off(1);
        let key = args.swap_remove(0);

        let len = self.blocking.push(key, values, end)?;
        Ok(RespValue::integer(len as i64))
    }

    /// LRANGE key start stop
    fn cmd_lrange(&self, args: &[Bytes]) -> CommandResult {
        let start = parse_integer(&args[1])?;
        let stop = parse_integer(&args[2])?;

        let elements = self.storage.list_range(&args[0], start, stop)?;
        Ok(RespValue::bulk_array(elements))
    }

    /// LLEN key
    fn cmd_llen(&self, args: &[Bytes]) -> CommandResult {
        let len = self.storage.list_len(&args[0])?;
        Ok(RespValue::integer(len as i64))
    }

    /// LPOP key [count]
    ///
    /// A single popped element is returned as a bulk string, several as an
    /// array, none as a null bulk string.
    fn cmd_lpop(&self, args: &[Bytes]) -> CommandResult {
        let count = match args.get(1) {
            Some(count) => parse_count(count)?,
            None => 1,
        };

        let mut popped = self.storage.list_pop_front(&args[0], count)?;
        Ok(match popped.len() {
            0 => RespValue::NullBulkString,
            1 => RespValue::bulk_string(popped.swap_remove(0)),
            _ => RespValue::bulk_array(popped),
        })
    }

    /// BLPOP key [timeout]
    async fn cmd_blpop(&self, args: &[Bytes]) -> CommandResult {
        let started = Instant::now();
        let key = &args[0];

        let timeout = match args.get(1) {
            Some(timeout) => parse_timeout(timeout)?,
            None => None,
        };
        // A timeout too far out to be represented as an instant is out of range
        let deadline = match timeout {
            Some(timeout) => Some(started.checked_add(timeout).ok_or(CommandError::NotAFloat)?),
            None => None,
        };

        Ok(match self.blocking.blocking_pop(key, deadline).await? {
            Some(value) => RespValue::bulk_array([key.clone(), value]),
            None => RespValue::NullArray,
        })
    }
}

// ============================================================================
// Argument parsing
// ============================================================================

fn parse_integer(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

fn parse_count(arg: &[u8]) -> Result<usize, CommandError> {
    let count = parse_integer(arg)?;
    usize::try_from(count).map_err(|_| CommandError::NegativeCount)
}

/// Parses a BLPOP timeout in seconds. Zero means no timeout.
fn parse_timeout(arg: &[u8]) -> Result<Option<Duration>, CommandError> {
    let secs: f64 = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|secs: &f64| secs.is_finite())
        .ok_or(CommandError::NotAFloat)?;

    if secs < 0.0 {
        return Err(CommandError::NegativeTimeout);
    }
    if secs == 0.0 {
        return Ok(None);
    }

    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| CommandError::NotAFloat)
}
