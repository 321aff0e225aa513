//! Line protocol between the remote watcher and the pull side.
//!
//! One UTF-8 text line per settled batch: `src:<path>\n`, where `<path>` is
//! relative to the watched root and the literal `.` names the root itself.
//! The consumer matches on raw bytes first and only then decodes the captured
//! path, so a non-text payload is a decode failure, never a crash.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use thiserror::Error;

/// Leading literal shared by producer and consumer. The two ends must agree
/// or no notification ever matches.
pub const NOTIFICATION_PREFIX: &str = "src:";

/// Marker for "the watched root itself changed".
pub const ROOT_MARKER: &str = ".";

// `(?-u)` so the path group matches raw bytes, not just well-formed UTF-8;
// decoding is a separate, recoverable step.
static NOTIFICATION_LINE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?-u)^src:(.+?)\s*$").expect("notification pattern is valid"));

#[derive(Error, Debug)]
pub enum ProtocolError {
	#[error("Unmatched notification line: {0:?}")]
	Unmatched(String),
	#[error("Notification path is not valid UTF-8: {0:?}")]
	Decode(Vec<u8>),
}

/// Render one settled batch as a wire line (without the trailing newline).
pub fn format_notification(path: &Path) -> String {
	format!("{NOTIFICATION_PREFIX}{}", path.display())
}

/// Parse one raw line from the remote watcher's output stream.
pub fn parse_notification(line: &[u8]) -> Result<String, ProtocolError> {
	let captures = NOTIFICATION_LINE
		.captures(line)
		.ok_or_else(|| ProtocolError::Unmatched(String::from_utf8_lossy(line).into_owned()))?;
	let path = captures
		.get(1)
		.expect("notification pattern has one capture group")
		.as_bytes();
	String::from_utf8(path.to_vec()).map_err(|e| ProtocolError::Decode(e.into_bytes()))
}
