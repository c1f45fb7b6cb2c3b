//! Blocking Coordinator Module
//!
//! Lets a client suspend until a list gains an element or a deadline passes.
//!
//! ## Architecture
//!
//! ```text
//!   RPUSH / LPUSH                               BLPOP
//!        │                                        │
//!        ▼                                        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  BlockingCoordinator                     │
//! │                                                          │
//! │   push ──> StorageEngine ──(lock released)──> notify     │
//! │                  ▲                              │        │
//! │                  │ re-check                     ▼        │
//! │   blocking_pop ──┴──────────────────── WaitRegistry      │
//! │                                     (Notify per key)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The storage lock and the registry lock are never held at the same time.

pub mod coordinator;
pub mod registry;

pub use coordinator::BlockingCoordinator;
pub use registry::{Registration, WaitRegistry};
