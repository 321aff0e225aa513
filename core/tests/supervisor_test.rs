//! Supervisor lifecycle tests: coordinators spin up from configuration,
//! cancellation stops them cleanly, and a bad entry fails fast.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use tide_core::{
	config::{Settings, SyncConfig, TreeEntry},
	supervisor::Supervisor,
};

fn config_for(tree: PathBuf, entry: TreeEntry) -> SyncConfig {
	let mut trees = BTreeMap::new();
	trees.insert(tree, entry);
	SyncConfig { trees }
}

#[tokio::test]
async fn push_coordinators_run_until_cancelled() {
	let tree = tempfile::tempdir().unwrap();
	let target = tempfile::tempdir().unwrap();

	// A do-nothing transfer tool keeps the baseline sync green.
	let settings = Settings {
		rsync: PathBuf::from("true"),
		push_delay: Duration::ZERO,
		..Settings::default()
	};
	let config = config_for(
		tree.path().to_path_buf(),
		TreeEntry {
			push_to: vec![target.path().display().to_string()],
			pull_from: vec![],
		},
	);

	let cancel = CancellationToken::new();
	let task = tokio::spawn(Supervisor::new(settings, config).run(cancel.clone()));

	sleep(Duration::from_millis(300)).await;
	cancel.cancel();
	task.await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_config_is_a_clean_noop() {
	let supervisor = Supervisor::new(Settings::default(), SyncConfig::default());
	supervisor.run(CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn entries_without_directions_start_nothing() {
	let tree = tempfile::tempdir().unwrap();
	let config = config_for(tree.path().to_path_buf(), TreeEntry::default());

	let supervisor = Supervisor::new(Settings::default(), config);
	supervisor.run(CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn invalid_remote_source_fails_fast() {
	let tree = tempfile::tempdir().unwrap();
	let config = config_for(
		tree.path().to_path_buf(),
		TreeEntry {
			push_to: vec![],
			pull_from: vec!["missing-a-separator".to_owned()],
		},
	);

	let supervisor = Supervisor::new(Settings::default(), config);
	let result = supervisor.run(CancellationToken::new()).await;
	assert!(result.is_err());
}
