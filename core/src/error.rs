use std::{io, path::PathBuf};

use thiserror::Error;
use tide_fs_events::WatchError;

/// Faults that terminate a sync coordinator.
///
/// Everything recoverable (a failed transfer, a garbled notification line, a
/// dropped channel within the retry budget) is handled where it happens and
/// never becomes a `SyncError`.
#[derive(Error, Debug)]
pub enum SyncError {
	#[error("Failed to spawn transfer tool {command}; (error: {source})")]
	TransferSpawn {
		command: String,
		#[source]
		source: io::Error,
	},
	#[error("Change event stream closed (tree: {0:?})")]
	EventStreamClosed(PathBuf),
	#[error("Filesystem watcher error (error: {0})")]
	Watch(#[from] WatchError),
	#[error("Remote watcher bridge failed (error: {0})")]
	Bridge(#[from] BridgeError),
}

/// Terminal failures of the remote monitor bridge. Connection losses inside
/// the retry budget are not errors, they drive the reconnect loop.
#[derive(Error, Debug)]
pub enum BridgeError {
	#[error("Remote watcher reconnect budget exhausted after {0} attempts")]
	RetriesExhausted(u32),
	#[error("Remote watcher bridge task crashed (error: {0})")]
	Crashed(String),
}
