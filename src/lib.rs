//! # tidekv - an in-memory key-value server speaking RESP
//!
//! tidekv keeps strings and lists in memory, expires strings passively on
//! access, and lets clients block on empty lists with `BLPOP` until another
//! client pushes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               tidekv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (main.rs)   │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──┬───────┬──┘                  │
//! │                            │              │       │                     │
//! │                            ▼              │       ▼                     │
//! │                     ┌─────────────┐       │  ┌─────────────────────┐    │
//! │                     │ RESP codec  │       │  │ BlockingCoordinator │    │
//! │                     └─────────────┘       │  │  (per-key Notify)   │    │
//! │                                           ▼  └──────────┬──────────┘    │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │              StorageEngine                   │    │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │                     │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...63   │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidekv::{handle_connection, BlockingCoordinator, CommandHandler, ConnectionStats, StorageEngine};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let commands = CommandHandler::new(Arc::new(BlockingCoordinator::new(storage)));
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, addr, commands.clone(), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`, `ECHO message [message ...]`
//! - `SET key value [EX seconds | PX milliseconds]`, `GET key`
//! - `RPUSH`/`LPUSH key value [value ...]`, `LRANGE key start stop`, `LLEN key`
//! - `LPOP key [count]`, `BLPOP key [timeout]`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP types, encoder and incremental decoder
//! - [`storage`]: sharded, typed storage with passive expiry
//! - [`blocking`]: wait registry and blocking pop
//! - [`commands`]: request validation and command execution
//! - [`connection`]: per-client read/execute/reply loop
//! - [`config`]: command-line configuration

pub mod blocking;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use blocking::BlockingCoordinator;
pub use commands::{CommandError, CommandHandler};
pub use config::{Config, Invocation};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{decode, ParseError, RespParser, RespValue};
pub use storage::{StorageEngine, StorageError};

/// The default port tidekv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host tidekv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of tidekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
