//! Push coordinator: one per watched local tree.
//!
//! INIT syncs the tree root to every target so each destination starts from
//! the current state; the steady loop then fans every settled change batch
//! out to all of them. A cycle only retires its dirty set when every target
//! succeeded; anything less and the members ride along into the next cycle.

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tide_fs_events::TreeWatcher;

use crate::{
	config::{join_under, Settings},
	debounce::{ChangeEvent, DebounceBatcher, EventSource},
	error::SyncError,
	executor::{path_str, RsyncExecutor, Transfer},
};

/// Fans locally settled change batches out to every configured target.
pub struct PushCoordinator<S, T> {
	root: PathBuf,
	targets: Vec<String>,
	delay: Duration,
	batcher: DebounceBatcher<S>,
	transfer: T,
	// Keeps the platform watcher registered for the coordinator's lifetime.
	_watcher: Option<TreeWatcher>,
}

impl PushCoordinator<chan::Receiver<ChangeEvent>, RsyncExecutor> {
	/// Watch `root` and push to `targets` with the production executor.
	pub fn for_tree(
		settings: Arc<Settings>,
		root: PathBuf,
		targets: Vec<String>,
	) -> Result<Self, SyncError> {
		let mut watcher = TreeWatcher::new(&root)?;
		watcher.watch()?;
		let events = watcher.events();

		Ok(Self {
			root,
			targets,
			delay: settings.push_delay,
			batcher: DebounceBatcher::new(events),
			transfer: RsyncExecutor::new(settings),
			_watcher: Some(watcher),
		})
	}
}

impl<S: EventSource, T: Transfer> PushCoordinator<S, T> {
	pub fn new(
		root: PathBuf,
		targets: Vec<String>,
		delay: Duration,
		source: S,
		transfer: T,
	) -> Self {
		Self {
			root,
			targets,
			delay,
			batcher: DebounceBatcher::new(source),
			transfer,
			_watcher: None,
		}
	}

	pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SyncError> {
		info!(
			root = %self.root.display(),
			targets = ?self.targets,
			delay = ?self.delay,
			"Starting push coordinator"
		);

		// INIT: baseline sync so every target starts from the current tree.
		if !self.fan_out(&self.root).await? {
			self.batcher.seed(self.root.clone());
		}

		// STEADY
		loop {
			let batch = tokio::select! {
				() = cancel.cancelled() => return Ok(()),
				batch = self.batcher.settle(self.delay) => {
					batch.ok_or_else(|| SyncError::EventStreamClosed(self.root.clone()))?
				}
			};

			info!(
				common = %batch.common.display(),
				members = batch.members.len(),
				"Settled change batch"
			);

			if self.fan_out(&batch.common).await? {
				self.batcher.mark_clean();
			}
		}
	}

	/// Sync `common` to its spot under every target. True iff all succeeded.
	async fn fan_out(&self, common: &Path) -> Result<bool, SyncError> {
		// Dirty members always live under the watched root.
		let rel = common.strip_prefix(&self.root).unwrap_or(Path::new(""));
		let source = path_str(common);

		let mut all_ok = true;
		for target in &self.targets {
			let destination = join_under(target, rel);
			if !self.transfer.transfer(&source, &destination).await? {
				all_ok = false;
			}
		}
		Ok(all_ok)
	}
}
