//! Core coordination logic for tidesync: unidirectional, notification-driven
//! directory synchronization between hosts over slow or intermittent links.
//!
//! The push side watches local trees, debounces change bursts and fans each
//! settled batch out to every configured destination. The pull side
//! supervises a remote watcher process across an ssh channel and mirrors its
//! settled batches into a local tree. Both sides retry failed transfers by
//! accumulation: a dirty set of changed directories that is only cleared once
//! every target of a cycle succeeds.

pub mod bridge;
pub mod config;
pub mod debounce;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod pull;
pub mod push;
pub mod supervisor;

pub use config::{Settings, SyncConfig};
pub use error::{BridgeError, SyncError};
pub use supervisor::Supervisor;
