//! Best-effort discovery of the manifest the agent itself writes into its working directory.

use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

use crate::digest::sha256_hex;
use crate::manifest::ManifestRef;

const AGENT_MANIFEST_SUFFIX: &str = ".json";

/// Find the most recently modified `<prefix>*.json` file in `dir` and fingerprint it.
///
/// Ties on modification time go to the last matching entry in directory-listing order.
/// Any failure (unreadable dir, no match, unreadable file) yields an empty reference.
pub fn locate_agent_manifest(dir: &Path, prefix: &str) -> ManifestRef {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!("agent manifest scan skipped for {}: {}", dir.display(), e);
            return ManifestRef::empty();
        }
    };

    let latest = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(prefix) && name.ends_with(AGENT_MANIFEST_SUFFIX)
        })
        .filter_map(|e| {
            let md = e.metadata().ok()?;
            if !md.is_file() {
                return None;
            }
            let mtime = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((mtime, e.path()))
        })
        .max_by_key(|(mtime, _)| *mtime);

    let Some((_, path)) = latest else {
        return ManifestRef::empty();
    };
    match fs::read(&path) {
        Ok(bytes) => ManifestRef {
            path: path.display().to_string(),
            digest: sha256_hex(&bytes),
        },
        Err(e) => {
            debug!("agent manifest {} unreadable: {}", path.display(), e);
            ManifestRef::empty()
        }
    }
}
