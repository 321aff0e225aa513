//! Companion remote watcher: watches one tree and prints a protocol line per
//! settled batch. Runs on the remote host; the daemon reads its stdout over
//! ssh, so stdout carries nothing but the wire protocol.

use std::{
	io::Write,
	path::PathBuf,
	time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tide_core::{
	config::expand_user,
	debounce::DebounceBatcher,
	protocol::{format_notification, ROOT_MARKER},
};
use tide_fs_events::TreeWatcher;

#[derive(Parser, Debug)]
#[command(
	name = "tide-monitor",
	about = "Report settled filesystem changes for a watched tree"
)]
struct Args {
	/// Directory tree to watch
	root: PathBuf,

	/// Seconds to wait after a change before reporting
	delay: f64,

	/// Write logs to this file instead of stderr
	#[arg(long)]
	logfile: Option<PathBuf>,

	/// Log at debug level
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	let _log_guard = init_logging(&args)?;

	let root = expand_user(&args.root)
		.canonicalize()
		.with_context(|| format!("Cannot resolve watch root {:?}", args.root))?;
	let delay = Duration::try_from_secs_f64(args.delay).unwrap_or_default();

	let mut watcher = TreeWatcher::new(&root)?;
	watcher.watch()?;
	info!(root = %root.display(), ?delay, "Watching tree");

	let mut batcher = DebounceBatcher::new(watcher.events());
	let mut stdout = std::io::stdout();

	while let Some(batch) = batcher.settle(delay).await {
		let rel = match batch.common.strip_prefix(&root) {
			Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from(ROOT_MARKER),
			Ok(rel) => rel.to_owned(),
			// Only possible if the root itself moved out from under us.
			Err(_) => PathBuf::from(ROOT_MARKER),
		};

		info!(
			common = %rel.display(),
			members = batch.members.len(),
			"Reporting settled batch"
		);
		// Stdout is a pipe under ssh; without the flush the consumer waits
		// on a full buffer, not on us.
		writeln!(stdout, "{}", format_notification(&rel))?;
		stdout.flush()?;

		// Every settled batch is reported exactly once; the consumer keeps
		// the success/failure bookkeeping, not us.
		batcher.mark_clean();
	}

	info!("Change stream ended, exiting");
	Ok(())
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
	let default_level = if args.verbose { "debug" } else { "info" };
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	match &args.logfile {
		Some(logfile) => {
			let logfile = expand_user(logfile);
			if let Some(parent) = logfile.parent() {
				std::fs::create_dir_all(parent)?;
			}
			let file = std::fs::OpenOptions::new()
				.create(true)
				.append(true)
				.open(&logfile)?;
			let (writer, guard) = tracing_appender::non_blocking(file);

			tracing_subscriber::fmt()
				.with_env_filter(filter)
				.with_writer(writer)
				.with_ansi(false)
				.init();
			Ok(Some(guard))
		}
		None => {
			tracing_subscriber::fmt()
				.with_env_filter(filter)
				.with_writer(std::io::stderr)
				.init();
			Ok(None)
		}
	}
}
