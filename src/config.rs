/*!
Bridge settings: one immutable record resolved at startup.

Precedence, highest first: environment variable, JSON config file key, built-in default.
A missing or malformed config file is treated as empty. The resolved value is passed
explicitly (usually as `Arc<Settings>`) to every component that needs it.
*/

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::util::{resolve_against, split_list};

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_AGENT_CMD: &str = "copilot";
pub const DEFAULT_AGENT_MANIFEST_PREFIX: &str = ".copilot.manifest.";
pub const DEFAULT_MANIFEST_DIR: &str = "var/manifests";
pub const DEFAULT_LOG_DIR: &str = "var/logs";
pub const CONFIG_FILE_RELATIVE: &str = "config/bridge.config.json";

pub const DEFAULT_ALLOW_TOOLS: &[&str] = &["shell", "git", "gh", "write"];
pub const DEFAULT_DENY_TOOLS: &[&str] = &[
    "shell(rm)",
    "shell(sudo)",
    "shell(dd)",
    "shell(curl -X POST)",
    "shell(wget)",
    "shell(docker push)",
];

/// Resolved bridge settings. Directory paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub default_cwd: PathBuf,
    pub default_timeout_ms: u64,
    pub allow_all_tools: bool,
    pub allow_tools: Vec<String>,
    pub deny_tools: Vec<String>,
    pub manifest_dir: PathBuf,
    pub log_dir: PathBuf,
    pub agent_cmd: String,
    pub agent_manifest_prefix: String,
    pub root: PathBuf,
}

/// Raw values read from the JSON config file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub bind: Option<String>,
    pub port: Option<Value>,
    pub default_cwd: Option<String>,
    pub default_timeout_ms: Option<Value>,
    pub allow_all_tools: Option<Value>,
    pub allow_tools: Option<Value>,
    pub deny_tools: Option<Value>,
    pub manifest_dir: Option<String>,
    pub log_dir: Option<String>,
    pub agent_cmd: Option<String>,
    pub agent_manifest_prefix: Option<String>,
}

impl FileConfig {
    /// Read a config file; any failure yields an empty config.
    pub fn read(path: &Path) -> FileConfig {
        let raw = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                debug!("config file {} not loaded: {}", path.display(), e);
                return FileConfig::default();
            }
        };
        match serde_json::from_str::<FileConfig>(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(
                    "config file {} is malformed ({}); using defaults",
                    path.display(),
                    e
                );
                FileConfig::default()
            }
        }
    }
}

/// Environment snapshot used during resolution.
pub type EnvMap = HashMap<String, String>;

fn env_str(env: &EnvMap, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s.trim().eq_ignore_ascii_case("true")),
        _ => None,
    }
}

fn value_as_list(v: &Value) -> Option<Vec<String>> {
    match v {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        ),
        Value::String(s) => Some(split_list(s)),
        _ => None,
    }
}

fn defaults(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Settings {
    /// Resolve settings from an environment snapshot, a parsed config file and a project root.
    /// Pure: performs no I/O.
    pub fn resolve(env: &EnvMap, file: &FileConfig, root: &Path) -> Settings {
        let bind = env_str(env, "BRIDGE_BIND")
            .or_else(|| file.bind.clone().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let port = env_str(env, "BRIDGE_PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .or_else(|| {
                file.port
                    .as_ref()
                    .and_then(value_as_u64)
                    .and_then(|p| u16::try_from(p).ok())
            })
            .unwrap_or(DEFAULT_PORT);

        let default_cwd = env_str(env, "DEFAULT_CWD")
            .or_else(|| file.default_cwd.clone().filter(|s| !s.trim().is_empty()))
            .map(|p| resolve_against(root, Path::new(&p)))
            .unwrap_or_else(|| root.to_path_buf());

        let default_timeout_ms = env_str(env, "DEFAULT_TIMEOUT_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .or_else(|| file.default_timeout_ms.as_ref().and_then(value_as_u64))
            .filter(|&ms| ms > 0)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let allow_all_tools = env_str(env, "ALLOW_ALL_TOOLS")
            .map(|s| s.eq_ignore_ascii_case("true"))
            .or_else(|| file.allow_all_tools.as_ref().and_then(value_as_bool))
            .unwrap_or(false);

        let allow_tools = env_str(env, "DEFAULT_ALLOW_TOOLS")
            .map(|s| split_list(&s))
            .or_else(|| file.allow_tools.as_ref().and_then(value_as_list))
            .unwrap_or_else(|| defaults(DEFAULT_ALLOW_TOOLS));

        let deny_tools = env_str(env, "DEFAULT_DENY_TOOLS")
            .map(|s| split_list(&s))
            .or_else(|| file.deny_tools.as_ref().and_then(value_as_list))
            .unwrap_or_else(|| defaults(DEFAULT_DENY_TOOLS));

        let manifest_dir = env_str(env, "MANIFEST_DIR")
            .or_else(|| file.manifest_dir.clone().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_MANIFEST_DIR.to_string());

        let log_dir = env_str(env, "LOG_DIR")
            .or_else(|| file.log_dir.clone().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());

        let agent_cmd = env_str(env, "BRIDGE_AGENT_CMD")
            .or_else(|| file.agent_cmd.clone().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_AGENT_CMD.to_string());

        let agent_manifest_prefix = env_str(env, "BRIDGE_AGENT_MANIFEST_PREFIX")
            .or_else(|| {
                file.agent_manifest_prefix
                    .clone()
                    .filter(|s| !s.trim().is_empty())
            })
            .unwrap_or_else(|| DEFAULT_AGENT_MANIFEST_PREFIX.to_string());

        Settings {
            bind,
            port,
            default_cwd,
            default_timeout_ms,
            allow_all_tools,
            allow_tools,
            deny_tools,
            manifest_dir: resolve_against(root, Path::new(&manifest_dir)),
            log_dir: resolve_against(root, Path::new(&log_dir)),
            agent_cmd,
            agent_manifest_prefix,
            root: root.to_path_buf(),
        }
    }

    /// Load settings for the process: `.env` from the root (non-overriding), the process
    /// environment, and the config file (`BRIDGE_CONFIG` or `<root>/config/bridge.config.json`).
    /// Creates the manifest and log directories.
    pub fn load(root: &Path) -> io::Result<Settings> {
        let dotenv = root.join(".env");
        if dotenv.is_file() {
            if let Err(e) = dotenvy::from_path(&dotenv) {
                warn!("ignoring {}: {}", dotenv.display(), e);
            }
        }
        let env: EnvMap = std::env::vars().collect();
        let cfg_path = env_str(&env, "BRIDGE_CONFIG")
            .map(|p| resolve_against(root, Path::new(&p)))
            .unwrap_or_else(|| root.join(CONFIG_FILE_RELATIVE));
        let file = FileConfig::read(&cfg_path);
        let settings = Settings::resolve(&env, &file, root);
        settings.ensure_dirs()?;
        Ok(settings)
    }

    /// Create the manifest and log directories if absent.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for d in [&self.manifest_dir, &self.log_dir] {
            fs::create_dir_all(d)?;
        }
        Ok(())
    }

    /// `bind:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Project root: explicit override, else `BRIDGE_ROOT`, else the current directory.
pub fn project_root(explicit: Option<&Path>) -> io::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("BRIDGE_ROOT") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p.trim()));
        }
    }
    std::env::current_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn file(json: &str) -> FileConfig {
        serde_json::from_str(json).expect("file config")
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let root = Path::new("/srv/bridge");
        let s = Settings::resolve(&EnvMap::new(), &FileConfig::default(), root);
        assert_eq!(s.bind, "127.0.0.1");
        assert_eq!(s.port, 7777);
        assert_eq!(s.default_cwd, PathBuf::from("/srv/bridge"));
        assert_eq!(s.default_timeout_ms, 600_000);
        assert!(!s.allow_all_tools);
        assert_eq!(s.allow_tools, vec!["shell", "git", "gh", "write"]);
        assert_eq!(s.deny_tools.len(), 6);
        assert_eq!(s.deny_tools[3], "shell(curl -X POST)");
        assert_eq!(s.manifest_dir, PathBuf::from("/srv/bridge/var/manifests"));
        assert_eq!(s.log_dir, PathBuf::from("/srv/bridge/var/logs"));
        assert_eq!(s.agent_cmd, "copilot");
        assert_eq!(s.agent_manifest_prefix, ".copilot.manifest.");
    }

    #[test]
    fn test_env_overrides_file_overrides_default() {
        let root = Path::new("/srv/bridge");
        let f = file(
            r#"{"defaultCwd":"/from/file","defaultTimeoutMs":1234,"allowTools":["a","b"],
                "denyTools":"x, y","manifestDir":"/abs/manifests","port":9000}"#,
        );
        let e = env(&[("DEFAULT_TIMEOUT_MS", "42"), ("DEFAULT_ALLOW_TOOLS", " git ,, gh ")]);
        let s = Settings::resolve(&e, &f, root);
        assert_eq!(s.default_cwd, PathBuf::from("/from/file"));
        assert_eq!(s.default_timeout_ms, 42);
        assert_eq!(s.allow_tools, vec!["git", "gh"]);
        assert_eq!(s.deny_tools, vec!["x", "y"]);
        assert_eq!(s.manifest_dir, PathBuf::from("/abs/manifests"));
        assert_eq!(s.port, 9000);
    }

    #[test]
    fn test_unparsable_numbers_fall_through() {
        let root = Path::new("/r");
        let f = file(r#"{"defaultTimeoutMs":"5000"}"#);
        let e = env(&[("BRIDGE_PORT", "not-a-port"), ("DEFAULT_TIMEOUT_MS", "soon")]);
        let s = Settings::resolve(&e, &f, root);
        assert_eq!(s.port, 7777);
        assert_eq!(s.default_timeout_ms, 5000);
    }

    #[test]
    fn test_allow_all_flag_parsing() {
        let root = Path::new("/r");
        let s = Settings::resolve(&env(&[("ALLOW_ALL_TOOLS", "TRUE")]), &FileConfig::default(), root);
        assert!(s.allow_all_tools);
        let s = Settings::resolve(&env(&[("ALLOW_ALL_TOOLS", "yes")]), &FileConfig::default(), root);
        assert!(!s.allow_all_tools);
        let s = Settings::resolve(&EnvMap::new(), &file(r#"{"allowAllTools":true}"#), root);
        assert!(s.allow_all_tools);
    }

    #[test]
    fn test_malformed_config_file_is_treated_as_empty() {
        let td = tempfile::tempdir().expect("tmpdir");
        let p = td.path().join("bridge.config.json");
        fs::write(&p, b"{ this is not json").expect("write");
        let f = FileConfig::read(&p);
        assert!(f.default_cwd.is_none());
        let missing = FileConfig::read(&td.path().join("absent.json"));
        assert!(missing.bind.is_none());
    }

    #[test]
    fn test_ensure_dirs_creates_relative_dirs_under_root() {
        let td = tempfile::tempdir().expect("tmpdir");
        let f = file(r#"{"manifestDir":"out/m","logDir":"out/l"}"#);
        let s = Settings::resolve(&EnvMap::new(), &f, td.path());
        s.ensure_dirs().expect("ensure dirs");
        assert!(td.path().join("out/m").is_dir());
        assert!(td.path().join("out/l").is_dir());
    }

    #[test]
    fn test_example_config_parses() {
        let p = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/bridge.config.example.json");
        let f = FileConfig::read(&p);
        let s = Settings::resolve(&EnvMap::new(), &f, Path::new("/r"));
        assert_eq!(s.default_cwd, PathBuf::from("/path/to/workspace"));
        assert_eq!(s.allow_tools, defaults(DEFAULT_ALLOW_TOOLS));
        assert_eq!(s.deny_tools, defaults(DEFAULT_DENY_TOOLS));
        assert_eq!(s.manifest_dir, PathBuf::from("/r/var/manifests"));
    }

    #[test]
    fn test_default_cwd_follows_project_root() {
        let root = Path::new("/srv/bridge");
        let s = Settings::resolve(&EnvMap::new(), &FileConfig::default(), root);
        assert_eq!(s.default_cwd, root);

        let s = Settings::resolve(&env(&[("DEFAULT_CWD", "work/a")]), &FileConfig::default(), root);
        assert_eq!(s.default_cwd, PathBuf::from("/srv/bridge/work/a"));

        let s = Settings::resolve(&EnvMap::new(), &file(r#"{"defaultCwd":"rel"}"#), root);
        assert_eq!(s.default_cwd, PathBuf::from("/srv/bridge/rel"));

        let s = Settings::resolve(&env(&[("DEFAULT_CWD", "/abs/w")]), &FileConfig::default(), root);
        assert_eq!(s.default_cwd, PathBuf::from("/abs/w"));
    }
}
