//! Remote change monitor bridge.
//!
//! Spawns the remote watcher program through the execution channel and relays
//! its line protocol into a local queue. Two composed machines: a reconnect
//! loop (CONNECTING → STREAMING → BACKOFF → GIVEUP) around a line reader that
//! turns raw output into notifications. Malformed lines are logged and
//! dropped; losing the channel costs one retry from a bounded budget.

use std::{io, process::Stdio, sync::Arc, time::Duration};

use async_channel as chan;
use async_trait::async_trait;
use tokio::{
	io::{AsyncBufReadExt, AsyncRead, BufReader},
	process::{Child, ChildStdout, Command},
	time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
	config::{RemoteSource, Settings},
	error::BridgeError,
	protocol::{self, ProtocolError},
};

/// One queue entry relayed from the remote watcher. `path: None` is the
/// sentinel enqueued on every disconnect, so downstream knows the stream has
/// a gap in it.
#[derive(Debug, Clone)]
pub struct BridgeNotification {
	pub at: Instant,
	pub path: Option<String>,
}

/// Reconnect bookkeeping. The attempt counter only ever grows; it resets on
/// process restart, not on a successful reconnect.
#[derive(Debug)]
struct RetryState {
	attempt: u32,
	max_attempts: u32,
	backoff: Duration,
}

/// Starts the remote watcher process and hands back its output stream.
#[async_trait]
pub trait MonitorLauncher: Send + 'static {
	type Stream: AsyncRead + Send + Unpin + 'static;

	async fn launch(&mut self) -> io::Result<Self::Stream>;
}

/// Production launcher: the remote watcher over ssh, stdout piped back.
pub struct SshLauncher {
	settings: Arc<Settings>,
	source: RemoteSource,
	current: Option<Child>,
}

impl SshLauncher {
	pub fn new(settings: Arc<Settings>, source: RemoteSource) -> Self {
		Self {
			settings,
			source,
			current: None,
		}
	}
}

#[async_trait]
impl MonitorLauncher for SshLauncher {
	type Stream = ChildStdout;

	async fn launch(&mut self) -> io::Result<ChildStdout> {
		let mut command = Command::new(&self.settings.ssh);
		command
			.arg(&self.source.host)
			.arg(&self.settings.monitor_remote)
			.arg("--verbose")
			.arg("--logfile")
			.arg(&self.settings.remote_log)
			.arg(&self.source.dir)
			.arg(self.settings.pull_delay.as_secs_f64().to_string())
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.kill_on_drop(true);

		debug!(command = ?command.as_std(), "Launching remote watcher");
		let mut child = command.spawn()?;
		let stdout = child.stdout.take().ok_or_else(|| {
			io::Error::new(io::ErrorKind::BrokenPipe, "child stdout not captured")
		})?;
		// Replacing the previous child kills it, if it is somehow still around.
		self.current = Some(child);
		Ok(stdout)
	}
}

/// Carries remote change notifications across the execution channel,
/// reconnecting with a fixed interval until the attempt budget is spent.
pub struct MonitorBridge<L> {
	launcher: L,
	notify_tx: chan::Sender<BridgeNotification>,
	retry: RetryState,
}

impl<L: MonitorLauncher> MonitorBridge<L> {
	pub fn new(
		launcher: L,
		notify_tx: chan::Sender<BridgeNotification>,
		max_attempts: u32,
		backoff: Duration,
	) -> Self {
		Self {
			launcher,
			notify_tx,
			retry: RetryState {
				attempt: 0,
				max_attempts,
				backoff,
			},
		}
	}

	/// Run until cancelled or the reconnect budget is exhausted.
	pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BridgeError> {
		loop {
			// CONNECTING
			match self.launcher.launch().await {
				Ok(stream) => {
					info!("Remote watcher channel open");
					// STREAMING, until the channel closes
					self.relay_lines(stream, &cancel).await;
				}
				Err(e) => warn!(?e, "Failed to launch remote watcher;"),
			}

			if cancel.is_cancelled() {
				return Ok(());
			}

			// BACKOFF
			self.retry.attempt += 1;
			let sentinel = BridgeNotification {
				at: Instant::now(),
				path: None,
			};
			if self.notify_tx.send(sentinel).await.is_err() {
				debug!("Notification queue closed, stopping bridge");
				return Ok(());
			}

			if self.retry.attempt >= self.retry.max_attempts {
				// GIVEUP
				error!(
					attempts = self.retry.attempt,
					"Remote watcher reconnect budget exhausted, giving up"
				);
				return Err(BridgeError::RetriesExhausted(self.retry.attempt));
			}

			info!(
				attempt = self.retry.attempt,
				max_attempts = self.retry.max_attempts,
				backoff = ?self.retry.backoff,
				"Remote watcher channel closed, reconnecting"
			);
			tokio::select! {
				() = cancel.cancelled() => return Ok(()),
				() = sleep(self.retry.backoff) => {}
			}
		}
	}

	/// Dispatch protocol lines until the stream closes.
	async fn relay_lines(&mut self, stream: L::Stream, cancel: &CancellationToken) {
		let mut lines = BufReader::new(stream).split(b'\n');
		loop {
			let segment = tokio::select! {
				() = cancel.cancelled() => return,
				segment = lines.next_segment() => segment,
			};

			match segment {
				Ok(Some(raw)) => match protocol::parse_notification(&raw) {
					Ok(path) => {
						debug!(path = %path, "Relaying remote change");
						let notification = BridgeNotification {
							at: Instant::now(),
							path: Some(path),
						};
						if self.notify_tx.send(notification).await.is_err() {
							return;
						}
					}
					Err(e @ ProtocolError::Unmatched(_)) => {
						info!(%e, "Discarding notification line")
					}
					Err(e @ ProtocolError::Decode(_)) => {
						warn!(%e, "Discarding notification line")
					}
				},
				Ok(None) => return,
				Err(e) => {
					warn!(?e, "Remote watcher stream error;");
					return;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::{collections::VecDeque, io::Cursor};

	use pretty_assertions::assert_eq;

	type BoxedStream = Box<dyn AsyncRead + Send + Unpin>;

	fn stream(bytes: &[u8]) -> BoxedStream {
		Box::new(Cursor::new(bytes.to_vec()))
	}

	/// Hands out the scripted streams in order, then fails every launch.
	struct ScriptedLauncher {
		streams: VecDeque<BoxedStream>,
	}

	impl ScriptedLauncher {
		fn with(streams: impl IntoIterator<Item = BoxedStream>) -> Self {
			Self {
				streams: streams.into_iter().collect(),
			}
		}
	}

	#[async_trait]
	impl MonitorLauncher for ScriptedLauncher {
		type Stream = BoxedStream;

		async fn launch(&mut self) -> io::Result<BoxedStream> {
			self.streams.pop_front().ok_or_else(|| {
				io::Error::new(io::ErrorKind::ConnectionRefused, "no more channels")
			})
		}
	}

	#[tokio::test]
	async fn gives_up_after_the_retry_budget_and_goes_quiet() {
		let (tx, rx) = chan::unbounded();
		let launcher = ScriptedLauncher {
			streams: VecDeque::new(),
		};
		let bridge = MonitorBridge::new(launcher, tx, 3, Duration::ZERO);

		let result = bridge.run(CancellationToken::new()).await;
		assert!(matches!(result, Err(BridgeError::RetriesExhausted(3))));

		let mut sentinels = 0;
		while let Ok(notification) = rx.try_recv() {
			assert!(notification.path.is_none());
			sentinels += 1;
		}
		assert_eq!(sentinels, 3);
		// The bridge is gone; nothing can ever emit another sentinel.
		assert!(rx.is_closed());
	}

	#[tokio::test]
	async fn relays_matched_lines_and_discards_garbage() {
		let (tx, rx) = chan::unbounded();
		let launcher =
			ScriptedLauncher::with([stream(b"src:/tmp/x\ngarbage\nsrc:logs/2026  \n")]);
		let bridge = MonitorBridge::new(launcher, tx, 1, Duration::ZERO);

		let result = bridge.run(CancellationToken::new()).await;
		assert!(matches!(result, Err(BridgeError::RetriesExhausted(1))));

		let paths: Vec<Option<String>> = std::iter::from_fn(|| rx.try_recv().ok())
			.map(|notification| notification.path)
			.collect();
		assert_eq!(
			paths,
			vec![
				Some("/tmp/x".to_owned()),
				Some("logs/2026".to_owned()),
				None, // disconnect sentinel after the stream ended
			]
		);
	}

	#[tokio::test]
	async fn reconnects_across_closed_streams() {
		let (tx, rx) = chan::unbounded();
		let launcher = ScriptedLauncher::with([stream(b"src:a\n"), stream(b"src:b\n")]);
		let bridge = MonitorBridge::new(launcher, tx, 3, Duration::ZERO);

		let result = bridge.run(CancellationToken::new()).await;
		assert!(matches!(result, Err(BridgeError::RetriesExhausted(3))));

		let paths: Vec<Option<String>> = std::iter::from_fn(|| rx.try_recv().ok())
			.map(|notification| notification.path)
			.collect();
		assert_eq!(
			paths,
			vec![
				Some("a".to_owned()),
				None,
				Some("b".to_owned()),
				None,
				None,
			]
		);
	}

	#[tokio::test]
	async fn cancellation_stops_the_loop_cleanly() {
		let (tx, _rx) = chan::unbounded();
		let cancel = CancellationToken::new();
		cancel.cancel();

		let launcher = ScriptedLauncher {
			streams: VecDeque::new(),
		};
		let bridge = MonitorBridge::new(launcher, tx, 100, Duration::ZERO);
		assert!(bridge.run(cancel).await.is_ok());
	}
}
