//! The command table.

use crate::commands::CommandError;

/// Every command the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    Echo,
    Get,
    Set,
    RPush,
    LPush,
    LRange,
    LLen,
    LPop,
    BLPop,
}

/// Accepted argument counts, command name included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(&self, argc: usize) -> bool {
        match *self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(min) => argc >= min,
            Arity::Between(min, max) => (min..=max).contains(&argc),
        }
    }
}

impl Command {
    const ALL: [Command; 10] = [
        Command::Ping,
        Command::Echo,
        Command::Get,
        Command::Set,
        Command::RPush,
        Command::LPush,
        Command::LRange,
        Command::LLen,
        Command::LPop,
        Command::BLPop,
    ];

    /// Looks up a command by name, ignoring ASCII case.
    pub fn lookup(name: &[u8]) -> Option<Command> {
        Self::ALL
            .into_iter()
            .find(|command| command.name().as_bytes().eq_ignore_ascii_case(name))
    }

    /// Lowercase name, as used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Echo => "echo",
            Command::Get => "get",
            Command::Set => "set",
            Command::RPush => "rpush",
            Command::LPush => "lpush",
            Command::LRange => "lrange",
            Command::LLen => "llen",
            Command::LPop => "lpop",
            Command::BLPop => "blpop",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Command::Ping => Arity::Between(1, 2),
            Command::Echo => Arity::AtLeast(2),
            Command::Get | Command::LLen => Arity::Exact(2),
            Command::Set | Command::RPush | Command::LPush => Arity::AtLeast(3),
            Command::LRange => Arity::Exact(4),
            Command::LPop | Command::BLPop => Arity::Between(2, 3),
        }
    }

    /// Fails with `WrongArity` unless `argc` arguments (name included) are accepted.
    pub fn check_arity(&self, argc: usize) -> Result<(), CommandError> {
        if self.arity().accepts(argc) {
            Ok(())
        } else {
            Err(CommandError::WrongArity(self.name()))
        }
    }
}
