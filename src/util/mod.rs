#![allow(clippy::module_name_repetitions)]
//! Small utilities: timestamps, host/user identity, path resolution, list parsing.

pub mod id;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// RFC 3339 UTC timestamp with millisecond precision, e.g. `2025-09-09T12:00:00.123Z`.
pub fn iso_timestamp(t: SystemTime) -> String {
    humantime::format_rfc3339_millis(t).to_string()
}

/// Timestamp safe for use inside a file name (`:` and `.` replaced by `-`).
pub fn file_safe_timestamp(t: SystemTime) -> String {
    iso_timestamp(t).replace([':', '.'], "-")
}

/// Milliseconds between two instants on the wall clock, saturating at zero.
pub fn millis_between(start: SystemTime, end: SystemTime) -> u64 {
    end.duration_since(start)
        .unwrap_or_else(|_| Duration::from_millis(0))
        .as_millis() as u64
}

/// Best-effort host name.
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Best-effort name of the user running the bridge.
pub fn user_name() -> String {
    #[cfg(unix)]
    {
        use nix::unistd::{getuid, User};
        if let Ok(Some(u)) = User::from_uid(getuid()) {
            return u.name;
        }
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Resolve `p` against `root` unless it is already absolute.
pub fn resolve_against(root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Split a comma-separated list into trimmed, non-empty entries, keeping order.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}
