//! Supervisor: owns every coordinator's lifecycle.
//!
//! One task per push coordinator and per pull coordinator. The first failure
//! cancels the survivors through the shared cancellation token and the
//! aggregated error goes back to the caller; a process built on this exits on
//! the first truly unexpected fault and on nothing else.

use std::sync::Arc;

use anyhow::{bail, Result};
use futures::future::{self, BoxFuture};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
	config::{RemoteSource, Settings, SyncConfig},
	error::SyncError,
	pull::PullCoordinator,
	push::PushCoordinator,
};

pub struct Supervisor {
	settings: Arc<Settings>,
	config: SyncConfig,
}

impl Supervisor {
	pub fn new(settings: Settings, config: SyncConfig) -> Self {
		Self {
			settings: Arc::new(settings),
			config,
		}
	}

	/// Spawn every configured coordinator and run until the first fault or
	/// until `cancel` fires.
	pub async fn run(self, cancel: CancellationToken) -> Result<()> {
		// Build everything before spawning anything, so a bad entry fails
		// fast with nothing left running.
		let mut jobs: Vec<(String, BoxFuture<'static, Result<(), SyncError>>)> = Vec::new();

		for (dir, entry) in &self.config.trees {
			if entry.push_to.is_empty() && entry.pull_from.is_empty() {
				warn!(dir = %dir.display(), "Configuration entry starts no coordinator");
				continue;
			}

			if !entry.push_to.is_empty() {
				let coordinator = PushCoordinator::for_tree(
					Arc::clone(&self.settings),
					dir.clone(),
					entry.push_to.clone(),
				)?;
				jobs.push((
					format!("push {}", dir.display()),
					Box::pin(coordinator.run(cancel.child_token())),
				));
			}

			for source in &entry.pull_from {
				let source = RemoteSource::parse(source)?;
				let name = format!("pull {} from {}", dir.display(), source.endpoint());
				let coordinator =
					PullCoordinator::new(Arc::clone(&self.settings), dir.clone(), source);
				jobs.push((name, Box::pin(coordinator.run(cancel.child_token()))));
			}
		}

		if jobs.is_empty() {
			warn!("No push or pull entries configured, nothing to do");
			return Ok(());
		}

		let mut names = Vec::with_capacity(jobs.len());
		let mut tasks: Vec<JoinHandle<Result<(), SyncError>>> = Vec::with_capacity(jobs.len());
		for (name, job) in jobs {
			names.push(name);
			tasks.push(tokio::spawn(job));
		}
		info!(coordinators = tasks.len(), "All sync coordinators running");

		// The first completed coordinator decides the outcome; cancel the
		// siblings and drain them all.
		let (first, index, rest) = future::select_all(tasks).await;
		let first_name = names.remove(index);

		let mut failures = Vec::new();
		record_outcome(&first_name, first, &mut failures);
		cancel.cancel();

		for (name, outcome) in names.iter().zip(future::join_all(rest).await) {
			record_outcome(name, outcome, &mut failures);
		}

		if failures.is_empty() {
			info!("All sync coordinators stopped");
			Ok(())
		} else {
			bail!(
				"{} coordinator(s) failed: {}",
				failures.len(),
				failures.join("; ")
			);
		}
	}
}

fn record_outcome(
	name: &str,
	outcome: Result<Result<(), SyncError>, tokio::task::JoinError>,
	failures: &mut Vec<String>,
) {
	match outcome {
		Ok(Ok(())) => info!(coordinator = name, "Coordinator stopped"),
		Ok(Err(e)) => {
			error!(coordinator = name, ?e, "Coordinator failed;");
			failures.push(format!("{name}: {e}"));
		}
		Err(e) => {
			error!(coordinator = name, ?e, "Coordinator panicked;");
			failures.push(format!("{name}: {e}"));
		}
	}
}
