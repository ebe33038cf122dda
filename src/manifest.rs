/*!
Audit manifest: one JSON record per run, written once under the manifest directory.

File names are `bridge.manifest.<timestamp>.<suffix>.json`. The timestamp has millisecond
precision with `:` and `.` replaced; the random suffix plus `create_new` keeps two runs in
the same millisecond from colliding. The returned digest is the SHA-256 of the exact bytes
written, so it can be re-verified by hashing the file.

Writes go straight to the final path; a crash mid-write leaves a partial file.
*/

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::digest::sha256_hex;
use crate::util::file_safe_timestamp;
use crate::util::id::random_hex_suffix;

pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_PREFIX: &str = "bridge.manifest.";
const SUFFIX_LEN: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 8;

/// Path and digest of a manifest file. Both empty when there is none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestRef {
    pub path: String,
    pub digest: String,
}

impl ManifestRef {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecSection {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub killed_by_timeout: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputSection {
    pub allow_all_tools: bool,
    pub allow_tools: Vec<String>,
    pub deny_tools: Vec<String>,
    pub prompt_bytes: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSection {
    pub bytes_stdout: usize,
    pub bytes_stderr: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSection {
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The gateway's own record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub version: u32,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
    pub host: String,
    pub user: String,
    pub pid: u32,
    pub exec: ExecSection,
    pub input: InputSection,
    pub output: OutputSection,
    pub result: ResultSection,
    pub agent_manifest: ManifestRef,
}

/// File name for a manifest written at `t` with the given suffix.
pub fn manifest_file_name(t: SystemTime, suffix: &str) -> String {
    format!("{}{}.{}.json", MANIFEST_PREFIX, file_safe_timestamp(t), suffix)
}

/// Serialize `record` as indented JSON into a new uniquely named file under `dir`.
pub fn write_audit_manifest(dir: &Path, record: &AuditRecord) -> io::Result<ManifestRef> {
    let bytes = serde_json::to_vec_pretty(record)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let now = SystemTime::now();

    let mut last_err: Option<io::Error> = None;
    for _ in 0..MAX_NAME_ATTEMPTS {
        let path: PathBuf = dir.join(manifest_file_name(now, &random_hex_suffix(SUFFIX_LEN)));
        let mut f = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        };
        f.write_all(&bytes)?;
        f.flush()?;
        return Ok(ManifestRef {
            path: path.display().to_string(),
            digest: sha256_hex(&bytes),
        });
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AlreadyExists, "no free manifest file name")
    }))
}
