use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tide_core::{
	config::{expand_user, Settings, SyncConfig},
	supervisor::Supervisor,
};

#[derive(Parser, Debug)]
#[command(
	name = "tidesyncd",
	about = "Notification-driven one-way directory synchronization daemon"
)]
struct Args {
	/// YAML configuration file mapping local trees to sync peers
	#[arg(long, default_value = "config.yaml")]
	config: PathBuf,

	/// Seconds to wait after a local change before pushing
	#[arg(long, default_value_t = 20.0)]
	push_delay: f64,

	/// Seconds the remote watcher waits after a change before reporting
	#[arg(long, default_value_t = 20.0)]
	pull_delay: f64,

	/// rsync --bwlimit RATE applied to every transfer
	#[arg(long)]
	bwlimit: Option<String>,

	/// Path of the remote watcher program on the remote hosts
	#[arg(long, default_value = "tide-monitor")]
	monitor_remote: PathBuf,

	/// Log file for the remote watcher, on the remote host
	#[arg(long, default_value = "~/logs/tide-monitor.log")]
	remote_log: PathBuf,

	/// Reconnect attempts before a remote watcher channel is abandoned
	#[arg(long, default_value_t = 100)]
	retries: u32,

	/// Seconds between reconnect attempts
	#[arg(long, default_value_t = 600.0)]
	retry_sleep: f64,

	/// ssh command to use
	#[arg(long, default_value = "/usr/bin/ssh")]
	ssh: PathBuf,

	/// rsync command to use
	#[arg(long, default_value = "/usr/bin/rsync")]
	rsync: PathBuf,

	/// rsync --temp-dir staging directory
	#[arg(long, default_value = "~/.cache")]
	cache: PathBuf,
}

impl Args {
	fn settings(&self) -> Settings {
		Settings {
			push_delay: secs(self.push_delay),
			pull_delay: secs(self.pull_delay),
			bwlimit: self.bwlimit.clone(),
			monitor_remote: self.monitor_remote.clone(),
			remote_log: self.remote_log.clone(),
			retries: self.retries,
			retry_sleep: secs(self.retry_sleep),
			ssh: self.ssh.clone(),
			rsync: self.rsync.clone(),
			cache: expand_user(&self.cache),
		}
	}
}

/// A non-positive delay still means "flush as soon as possible", never a panic.
fn secs(value: f64) -> Duration {
	Duration::try_from_secs_f64(value).unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let config = SyncConfig::load(&args.config)?;
	let supervisor = Supervisor::new(args.settings(), config);
	let cancel = CancellationToken::new();

	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		result = supervisor.run(cancel.clone()) => result,
		() = ctrl_c => {
			info!("Received Ctrl+C, shutting down");
			cancel.cancel();
			Ok(())
		}
		() = terminate => {
			info!("Received SIGTERM, shutting down");
			cancel.cancel();
			Ok(())
		}
	}
}
