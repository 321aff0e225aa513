//! Configuration: the YAML tree document and the immutable process settings.

use std::{
	collections::BTreeMap,
	fs, io,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("Failed to read configuration file (path: {0:?}); (error: {1})")]
	Read(PathBuf, io::Error),
	#[error("Failed to parse configuration file (path: {0:?}); (error: {1})")]
	Parse(PathBuf, serde_yaml::Error),
	#[error("Remote source is missing the host separator (source: {0:?})")]
	InvalidRemote(String),
}

/// One watched tree in the configuration document. Both directions may be
/// present; an entry with neither starts no coordinator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreeEntry {
	#[serde(default, rename = "pushTo")]
	pub push_to: Vec<String>,
	#[serde(default, rename = "pullFrom")]
	pub pull_from: Vec<String>,
}

/// The parsed configuration document: local tree → sync peers.
///
/// ```yaml
/// /data/outgoing:
///   pushTo: ["shore:/data/incoming", "/mnt/backup/outgoing"]
/// /data/incoming:
///   pullFrom: ["ship:/data/outgoing"]
/// ```
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
	pub trees: BTreeMap<PathBuf, TreeEntry>,
}

impl SyncConfig {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text =
			fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
		Self::parse(&text).map_err(|e| ConfigError::Parse(path.to_owned(), e))
	}

	fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
		// A null entry is legal and simply starts nothing.
		let raw: BTreeMap<PathBuf, Option<TreeEntry>> = serde_yaml::from_str(text)?;
		let trees = raw
			.into_iter()
			.map(|(dir, entry)| (expand_user(&dir), entry.unwrap_or_default()))
			.collect();
		Ok(Self { trees })
	}
}

/// One pull coordinator's upstream, written `host:remoteDir` in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
	pub host: String,
	pub dir: String,
}

impl RemoteSource {
	pub fn parse(source: &str) -> Result<Self, ConfigError> {
		let (host, dir) = source
			.split_once(':')
			.ok_or_else(|| ConfigError::InvalidRemote(source.to_owned()))?;
		if host.is_empty() || dir.is_empty() {
			return Err(ConfigError::InvalidRemote(source.to_owned()));
		}
		Ok(Self {
			host: host.to_owned(),
			dir: dir.to_owned(),
		})
	}

	/// The `host:dir` endpoint the transfer tool understands.
	pub fn endpoint(&self) -> String {
		format!("{}:{}", self.host, self.dir)
	}

	/// The endpoint of a path beneath the remote root.
	pub fn endpoint_of(&self, rel: &Path) -> String {
		format!("{}:{}", self.host, join_under(&self.dir, rel))
	}
}

/// Join a relative path under a string endpoint, `/`-separated. An empty
/// relative path names the endpoint itself.
pub fn join_under(base: &str, rel: &Path) -> String {
	if rel.as_os_str().is_empty() {
		return base.to_owned();
	}
	let base = base.strip_suffix('/').unwrap_or(base);
	format!("{}/{}", base, rel.display())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_user(path: &Path) -> PathBuf {
	let Some(home) = dirs::home_dir() else {
		return path.to_owned();
	};
	if path == Path::new("~") {
		return home;
	}
	match path.strip_prefix("~") {
		Ok(rest) => home.join(rest),
		Err(_) => path.to_owned(),
	}
}

/// Process-wide settings resolved from the command line. Immutable once
/// built; every coordinator receives a shared handle at construction.
#[derive(Debug, Clone)]
pub struct Settings {
	/// Debounce window on the push side.
	pub push_delay: Duration,
	/// Debounce window on the pull side, also handed to the remote watcher.
	pub pull_delay: Duration,
	/// Optional transfer rate cap, forwarded to the transfer tool.
	pub bwlimit: Option<String>,
	/// Path of the remote watcher program on the remote hosts.
	pub monitor_remote: PathBuf,
	/// Log file for the remote watcher, on the remote host.
	pub remote_log: PathBuf,
	/// Reconnect attempts before a remote watcher channel is abandoned.
	pub retries: u32,
	/// Fixed interval between reconnect attempts.
	pub retry_sleep: Duration,
	pub ssh: PathBuf,
	pub rsync: PathBuf,
	/// Staging directory handed to the transfer tool as its temp dir.
	pub cache: PathBuf,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			push_delay: Duration::from_secs(20),
			pull_delay: Duration::from_secs(20),
			bwlimit: None,
			monitor_remote: PathBuf::from("tide-monitor"),
			remote_log: PathBuf::from("~/logs/tide-monitor.log"),
			retries: 100,
			retry_sleep: Duration::from_secs(600),
			ssh: PathBuf::from("/usr/bin/ssh"),
			rsync: PathBuf::from("/usr/bin/rsync"),
			cache: PathBuf::from("~/.cache"),
		}
	}
}
