//! Command Module
//!
//! Receives decoded requests, executes them against the storage engine (and
//! the blocking coordinator for list pushes and BLPOP) and returns replies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Lookup       │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────┐
//! │ StorageEngine / BlockingCoordinator │
//! └─────────────────────────────────────┘
//! ```

pub mod command;
pub mod error;
pub mod handler;

pub use command::{Arity, Command};
pub use error::CommandError;
pub use handler::CommandHandler;
