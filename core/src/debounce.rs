//! Burst absorption for change events.
//!
//! A [`DebounceBatcher`] blocks for the first event of a cycle, sleeps out the
//! debounce window relative to that event's timestamp, then drains whatever
//! else queued up in the meantime and reduces the accumulated directories to
//! their longest shared prefix. The dirty set survives across cycles until
//! [`DebounceBatcher::mark_clean`] is called, so a failed cycle's members
//! union with the next one.

use std::{
	collections::BTreeSet,
	path::{Component, PathBuf},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::trace;

pub use tide_fs_events::ChangeEvent;

/// Floor for the debounce sleep, so a non-positive or already elapsed delay
/// never busy-loops.
pub const MIN_SETTLE: Duration = Duration::from_millis(100);

/// Where a batcher's events come from.
#[async_trait]
pub trait EventSource: Send {
	/// Wait for the next event. `None` means the stream has ended.
	async fn recv(&mut self) -> Option<ChangeEvent>;

	/// Take an already queued event without waiting.
	fn try_recv(&mut self) -> Option<ChangeEvent>;
}

#[async_trait]
impl EventSource for chan::Receiver<ChangeEvent> {
	async fn recv(&mut self) -> Option<ChangeEvent> {
		chan::Receiver::recv(self).await.ok()
	}

	fn try_recv(&mut self) -> Option<ChangeEvent> {
		chan::Receiver::try_recv(self).ok()
	}
}

/// One settled cycle: the reduced common path and the full dirty set behind
/// it, for success/failure bookkeeping by the owning coordinator.
#[derive(Debug, Clone)]
pub struct Batch {
	pub common: PathBuf,
	pub members: BTreeSet<PathBuf>,
}

pub struct DebounceBatcher<S> {
	source: S,
	dirty: BTreeSet<PathBuf>,
}

impl<S: EventSource> DebounceBatcher<S> {
	pub fn new(source: S) -> Self {
		Self {
			source,
			dirty: BTreeSet::new(),
		}
	}

	/// Pre-dirty a path so the next cycle includes it even without a fresh
	/// event.
	pub fn seed(&mut self, path: PathBuf) {
		self.dirty.insert(path);
	}

	pub fn is_dirty(&self) -> bool {
		!self.dirty.is_empty()
	}

	/// Clear the dirty set after a fully successful cycle.
	pub fn mark_clean(&mut self) {
		self.dirty.clear();
	}

	/// Wait for the next burst of events to settle. Returns `None` when the
	/// event stream has ended; otherwise the batch is never empty.
	pub async fn settle(&mut self, delay: Duration) -> Option<Batch> {
		let first = self.source.recv().await?;
		let wait = delay.saturating_sub(first.at.elapsed()).max(MIN_SETTLE);
		trace!(?wait, path = %first.path.display(), "Debouncing change burst");
		self.dirty.insert(first.path);
		sleep(wait).await;

		while let Some(event) = self.source.try_recv() {
			self.dirty.insert(event.path);
		}

		let common = common_path(self.dirty.iter());
		Some(Batch {
			common,
			members: self.dirty.clone(),
		})
	}
}

/// Lexically longest shared directory prefix of a set of paths, computed
/// component-wise. An empty result means the paths share no prefix at all,
/// which can only happen for relative inputs.
pub fn common_path<'a, I>(paths: I) -> PathBuf
where
	I: IntoIterator<Item = &'a PathBuf>,
{
	let mut iter = paths.into_iter();
	let Some(first) = iter.next() else {
		return PathBuf::new();
	};

	let mut prefix: Vec<Component<'_>> = first.components().collect();
	for path in iter {
		let shared = prefix
			.iter()
			.zip(path.components())
			.take_while(|(a, b)| **a == *b)
			.count();
		prefix.truncate(shared);
	}

	prefix.iter().map(|component| component.as_os_str()).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::collections::VecDeque;

	use pretty_assertions::assert_eq;
	use tokio::time::{advance, Instant};

	fn event(path: &str) -> ChangeEvent {
		ChangeEvent {
			at: Instant::now(),
			path: path.into(),
		}
	}

	fn set<const N: usize>(paths: [&str; N]) -> BTreeSet<PathBuf> {
		paths.into_iter().map(PathBuf::from).collect()
	}

	/// Scripted source: hands out the queued events, then pends forever.
	struct Scripted {
		queued: VecDeque<ChangeEvent>,
	}

	impl Scripted {
		fn with(events: impl IntoIterator<Item = ChangeEvent>) -> Self {
			Self {
				queued: events.into_iter().collect(),
			}
		}
	}

	#[async_trait]
	impl EventSource for Scripted {
		async fn recv(&mut self) -> Option<ChangeEvent> {
			match self.queued.pop_front() {
				Some(event) => Some(event),
				None => std::future::pending().await,
			}
		}

		fn try_recv(&mut self) -> Option<ChangeEvent> {
			self.queued.pop_front()
		}
	}

	#[test]
	fn common_path_reduces_to_the_shared_ancestor() {
		let paths = set(["/a/b", "/a/b/c", "/a/d"]);
		assert_eq!(common_path(paths.iter()), PathBuf::from("/a"));
	}

	#[test]
	fn common_path_of_one_member_is_that_member() {
		let paths = set(["/only/one"]);
		assert_eq!(common_path(paths.iter()), PathBuf::from("/only/one"));
	}

	#[test]
	fn common_path_of_disjoint_relative_paths_is_empty() {
		let paths = set([".", "a/b"]);
		assert_eq!(common_path(paths.iter()), PathBuf::new());
	}

	#[tokio::test(start_paused = true)]
	async fn settle_waits_out_the_debounce_window() {
		let t0 = Instant::now();
		let mut batcher = DebounceBatcher::new(Scripted::with([event("/watch/a")]));

		let batch = batcher.settle(Duration::from_secs(20)).await.unwrap();

		let waited = t0.elapsed();
		assert!(waited >= Duration::from_secs(20), "flushed after {waited:?}");
		assert!(waited < Duration::from_secs(21), "flushed after {waited:?}");
		assert_eq!(batch.common, PathBuf::from("/watch/a"));
	}

	#[tokio::test(start_paused = true)]
	async fn settle_never_sleeps_less_than_the_floor() {
		advance(Duration::from_secs(120)).await;

		// An event whose window already elapsed long ago.
		let stale = ChangeEvent {
			at: Instant::now() - Duration::from_secs(60),
			path: "/watch/a".into(),
		};
		let mut batcher = DebounceBatcher::new(Scripted::with([stale]));

		let t0 = Instant::now();
		batcher.settle(Duration::from_secs(20)).await.unwrap();

		let waited = t0.elapsed();
		assert!(waited >= MIN_SETTLE, "slept only {waited:?}");
		assert!(waited < 2 * MIN_SETTLE, "slept {waited:?}");
	}

	#[tokio::test]
	async fn settle_drains_everything_queued_in_the_window() {
		let mut batcher = DebounceBatcher::new(Scripted::with([
			event("/w/a/deep"),
			event("/w/b"),
			event("/w/c"),
		]));

		let batch = batcher.settle(Duration::ZERO).await.unwrap();

		assert_eq!(batch.members, set(["/w/a/deep", "/w/b", "/w/c"]));
		assert_eq!(batch.common, PathBuf::from("/w"));
	}

	#[tokio::test]
	async fn dirty_set_accumulates_until_marked_clean() {
		let (tx, rx) = chan::unbounded();
		let mut batcher = DebounceBatcher::new(rx);

		tx.send(event("/w/a")).await.unwrap();
		let first = batcher.settle(Duration::ZERO).await.unwrap();
		assert_eq!(first.members, set(["/w/a"]));

		// The cycle failed downstream: no mark_clean. Members must survive.
		tx.send(event("/w/b")).await.unwrap();
		let second = batcher.settle(Duration::ZERO).await.unwrap();
		assert!(second.members.is_superset(&first.members));
		assert_eq!(second.common, PathBuf::from("/w"));

		batcher.mark_clean();
		assert!(!batcher.is_dirty());

		tx.send(event("/w/c")).await.unwrap();
		let third = batcher.settle(Duration::ZERO).await.unwrap();
		assert_eq!(third.members, set(["/w/c"]));
	}

	#[tokio::test]
	async fn seeded_paths_join_the_next_cycle() {
		let mut batcher = DebounceBatcher::new(Scripted::with([event("/w/fresh")]));
		batcher.seed("/w/carried".into());

		let batch = batcher.settle(Duration::ZERO).await.unwrap();
		assert_eq!(batch.members, set(["/w/carried", "/w/fresh"]));
	}

	#[tokio::test]
	async fn settle_ends_with_the_stream() {
		let (tx, rx) = chan::unbounded::<ChangeEvent>();
		drop(tx);

		let mut batcher = DebounceBatcher::new(rx);
		assert!(batcher.settle(Duration::ZERO).await.is_none());
	}
}
