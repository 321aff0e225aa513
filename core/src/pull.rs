//! Pull coordinator: one per remote source.
//!
//! Owns a monitor bridge that relays settled batches from the remote watcher.
//! Notifications are debounced exactly like the push side and reduced to one
//! transfer per cycle; the root marker (or a disconnect sentinel) widens the
//! cycle to the whole tree.

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use async_channel as chan;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
	bridge::{BridgeNotification, MonitorBridge, MonitorLauncher, SshLauncher},
	config::{RemoteSource, Settings},
	debounce::{Batch, ChangeEvent, DebounceBatcher, EventSource},
	error::{BridgeError, SyncError},
	executor::{path_str, RsyncExecutor, Transfer},
	protocol::ROOT_MARKER,
};

/// Adapts the bridge queue to the batcher. Notification paths become relative
/// directories; the disconnect sentinel becomes the root marker, so the first
/// cycle after a reconnect sweeps up whatever changed while the channel was
/// down.
struct BridgeSource {
	notify_rx: chan::Receiver<BridgeNotification>,
}

fn to_change_event(notification: BridgeNotification) -> ChangeEvent {
	let path = match notification.path {
		Some(path) => PathBuf::from(path),
		None => {
			warn!("Remote watcher channel dropped, marking the whole tree dirty");
			PathBuf::from(ROOT_MARKER)
		}
	};
	ChangeEvent {
		at: notification.at,
		path,
	}
}

#[async_trait]
impl EventSource for BridgeSource {
	async fn recv(&mut self) -> Option<ChangeEvent> {
		self.notify_rx.recv().await.ok().map(to_change_event)
	}

	fn try_recv(&mut self) -> Option<ChangeEvent> {
		self.notify_rx.try_recv().ok().map(to_change_event)
	}
}

/// Mirrors one remote tree into a local target, driven by bridged
/// notifications from the remote watcher.
pub struct PullCoordinator<T> {
	source: RemoteSource,
	target: PathBuf,
	settings: Arc<Settings>,
	transfer: T,
}

impl PullCoordinator<RsyncExecutor> {
	pub fn new(settings: Arc<Settings>, target: PathBuf, source: RemoteSource) -> Self {
		Self {
			transfer: RsyncExecutor::new(Arc::clone(&settings)),
			source,
			target,
			settings,
		}
	}
}

impl<T: Transfer> PullCoordinator<T> {
	pub async fn run(self, cancel: CancellationToken) -> Result<(), SyncError> {
		let launcher = SshLauncher::new(Arc::clone(&self.settings), self.source.clone());
		self.run_with_launcher(launcher, cancel).await
	}

	/// Run against an explicit launcher; the production path wires in ssh.
	pub(crate) async fn run_with_launcher<L: MonitorLauncher>(
		self,
		launcher: L,
		cancel: CancellationToken,
	) -> Result<(), SyncError> {
		info!(
			source = %self.source.endpoint(),
			target = %self.target.display(),
			delay = ?self.settings.pull_delay,
			"Starting pull coordinator"
		);

		let (notify_tx, notify_rx) = chan::unbounded();
		let bridge = MonitorBridge::new(
			launcher,
			notify_tx,
			self.settings.retries,
			self.settings.retry_sleep,
		);
		let bridge_task: JoinHandle<Result<(), BridgeError>> =
			tokio::spawn(bridge.run(cancel.child_token()));

		let mut batcher = DebounceBatcher::new(BridgeSource { notify_rx });

		// Baseline sync so we start from a known state.
		if !self
			.transfer
			.transfer(&self.source.endpoint(), &path_str(&self.target))
			.await?
		{
			batcher.seed(PathBuf::from(ROOT_MARKER));
		}

		loop {
			let batch = tokio::select! {
				() = cancel.cancelled() => return Ok(()),
				batch = batcher.settle(self.settings.pull_delay) => match batch {
					Some(batch) => batch,
					// Queue drained and closed: the bridge has the verdict.
					None => break,
				},
			};

			info!(
				common = %batch.common.display(),
				members = batch.members.len(),
				"Settled remote change batch"
			);

			if self.sync_batch(&batch).await? {
				batcher.mark_clean();
			}
		}

		match bridge_task.await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(e)) => Err(e.into()),
			Err(e) => Err(BridgeError::Crashed(e.to_string()).into()),
		}
	}

	/// One transfer for a settled batch: the whole tree for the root marker,
	/// otherwise the common sub-path on both ends.
	async fn sync_batch(&self, batch: &Batch) -> Result<bool, SyncError> {
		let (source, destination) = match sub_path(&batch.common) {
			None => (self.source.endpoint(), path_str(&self.target)),
			Some(rel) => (
				self.source.endpoint_of(rel),
				path_str(&self.target.join(rel)),
			),
		};
		self.transfer.transfer(&source, &destination).await
	}
}

/// `None` means the whole tree: the root marker, or an empty common prefix
/// from a batch whose members share nothing.
fn sub_path(common: &Path) -> Option<&Path> {
	if common.as_os_str().is_empty() || common == Path::new(ROOT_MARKER) {
		None
	} else {
		Some(common)
	}
}
