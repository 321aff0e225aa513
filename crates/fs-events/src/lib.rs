//! Filesystem change notifications for watched trees.
//!
//! Wraps the platform notification backend and emits one normalized
//! [`ChangeEvent`] per affected directory: changed files are mapped to their
//! containing directory before they leave this crate, so consumers only ever
//! see directories.

use std::path::{Path, PathBuf};

use async_channel as chan;
use notify::{
	event::{AccessKind, AccessMode},
	Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, trace};

#[derive(Error, Debug)]
pub enum WatchError {
	#[error("Failed to set up filesystem watcher (error: {0})")]
	Notify(#[from] notify::Error),
	#[error("Watched tree is not a directory (path: {0:?})")]
	NotDirectory(PathBuf),
}

/// A single change notification. `path` is always a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
	pub at: Instant,
	pub path: PathBuf,
}

/// Watches one directory tree recursively and streams [`ChangeEvent`]s.
///
/// The backend callback runs on the watcher's own thread and pushes into an
/// unbounded channel, so it never blocks on a slow consumer. Dropping the
/// watcher stops the stream.
pub struct TreeWatcher {
	root: PathBuf,
	watcher: RecommendedWatcher,
	events_rx: chan::Receiver<ChangeEvent>,
}

impl TreeWatcher {
	pub fn new(root: impl AsRef<Path>) -> Result<Self, WatchError> {
		let root = root.as_ref().to_path_buf();
		if !root.is_dir() {
			return Err(WatchError::NotDirectory(root));
		}

		let (events_tx, events_rx) = chan::unbounded();
		let watcher = RecommendedWatcher::new(
			move |result: notify::Result<Event>| match result {
				Ok(event) => {
					if let Some(path) = dirtied_dir(&event) {
						// Unbounded channel, so this never blocks the backend thread.
						let change = ChangeEvent {
							at: Instant::now(),
							path,
						};
						if events_tx.send_blocking(change).is_err() {
							trace!("Change event receiver dropped");
						}
					}
				}
				Err(e) => error!(?e, "Watcher backend error;"),
			},
			Config::default(),
		)?;

		Ok(Self {
			root,
			watcher,
			events_rx,
		})
	}

	/// Start watching the tree recursively.
	pub fn watch(&mut self) -> Result<(), WatchError> {
		self.watcher.watch(&self.root, RecursiveMode::Recursive)?;
		trace!(root = %self.root.display(), "Now watching tree");
		Ok(())
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// The live event stream.
	pub fn events(&self) -> chan::Receiver<ChangeEvent> {
		self.events_rx.clone()
	}
}

/// The directory a raw backend event dirties, if any.
///
/// Close-after-write is the "file updated" signal; every other access kind is
/// just a read and produces nothing to sync.
fn dirtied_dir(event: &Event) -> Option<PathBuf> {
	match event.kind {
		EventKind::Access(kind) if kind != AccessKind::Close(AccessMode::Write) => None,
		_ => event.paths.first().map(|path| containing_dir(path)),
	}
}

/// Directories map to themselves, everything else to its parent. A removed
/// path no longer stats as a directory, so it also maps to its parent.
pub fn containing_dir(path: &Path) -> PathBuf {
	if path.is_dir() {
		path.to_path_buf()
	} else {
		path.parent().unwrap_or(path).to_path_buf()
	}
}
