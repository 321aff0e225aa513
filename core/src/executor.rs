//! External transfer tool invocation.
//!
//! The tool moves the bytes; this module only builds the fixed flag contract,
//! captures the combined output for the logs and maps the exit status. A
//! non-zero exit is a recoverable transfer failure; failing to spawn the tool
//! at all is fatal to the owning coordinator.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{config::Settings, error::SyncError};

/// Moves bytes for one (source, destination) pair. `Ok(false)` is a transfer
/// failure the caller retries by accumulation.
#[async_trait]
pub trait Transfer: Send + Sync {
	async fn transfer(&self, source: &str, destination: &str) -> Result<bool, SyncError>;
}

/// Production executor: rsync in archive mode with deferred deletes, staging
/// through the configured temp directory.
pub struct RsyncExecutor {
	settings: Arc<Settings>,
}

impl RsyncExecutor {
	pub fn new(settings: Arc<Settings>) -> Self {
		Self { settings }
	}
}

#[async_trait]
impl Transfer for RsyncExecutor {
	async fn transfer(&self, source: &str, destination: &str) -> Result<bool, SyncError> {
		let mut command = Command::new(&self.settings.rsync);
		command
			.arg("--verbose")
			.arg("--archive")
			.arg("--temp-dir")
			.arg(&self.settings.cache)
			.arg("--delete-delay");
		if let Some(rate) = &self.settings.bwlimit {
			command.arg(format!("--bwlimit={rate}"));
		}
		command.arg(with_trailing_slash(source)).arg(destination);

		let rendered = format!("{:?}", command.as_std());
		let output = command
			.output()
			.await
			.map_err(|source| SyncError::TransferSpawn {
				command: rendered.clone(),
				source,
			})?;

		let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
		combined.push_str(&String::from_utf8_lossy(&output.stderr));
		let combined = combined.trim();

		if output.status.success() {
			info!(command = %rendered, output = %combined, "Transfer finished");
			Ok(true)
		} else {
			warn!(
				command = %rendered,
				code = ?output.status.code(),
				output = %combined,
				"Transfer failed"
			);
			Ok(false)
		}
	}
}

/// Copy the contents of the directory, not the directory itself.
fn with_trailing_slash(path: &str) -> String {
	if path.ends_with('/') {
		path.to_owned()
	} else {
		format!("{path}/")
	}
}

pub(crate) fn path_str(path: &Path) -> String {
	path.display().to_string()
}
