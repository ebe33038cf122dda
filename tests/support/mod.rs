/*!
Test support helpers shared across integration tests.

- write_stub_agent(dir, name, body): create an executable shell script standing in for the agent
- start_bridge(root, agent, grace): resolve settings under `root` and start a server on port 0
- http_send_raw / http_post_json / http_get_json: minimal raw HTTP clients over TCP
- audit_manifests(dir): list `bridge.manifest.*.json` files
*/

use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_bridge::config::{EnvMap, FileConfig, Settings};
use agent_bridge::gateway::{Bridge, BridgeServer};
use agent_bridge::Supervisor;

/// Write `#!/bin/sh` + `body` to `dir/name` and mark it executable.
#[allow(dead_code)]
pub fn write_stub_agent(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub agent");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod stub agent");
    }
    path
}

/// Settings rooted at `root`: manifests in `root/var/manifests`, default cwd `root`.
#[allow(dead_code)]
pub fn settings_for(root: &Path, agent: &Path, extra: &[(&str, &str)]) -> Settings {
    let mut env: EnvMap = EnvMap::new();
    env.insert("BRIDGE_AGENT_CMD".into(), agent.display().to_string());
    env.insert("BRIDGE_BIND".into(), "127.0.0.1".into());
    env.insert("BRIDGE_PORT".into(), "0".into());
    for (k, v) in extra {
        env.insert(k.to_string(), v.to_string());
    }
    let settings = Settings::resolve(&env, &FileConfig::default(), root);
    settings.ensure_dirs().expect("create dirs");
    settings
}

/// Start a bridge on an ephemeral port. `grace` overrides the SIGTERM to SIGKILL delay.
#[allow(dead_code)]
pub fn start_bridge(settings: Settings, grace: Option<Duration>) -> BridgeServer {
    let addr = settings.listen_addr();
    let settings = Arc::new(settings);
    let bridge = match grace {
        Some(g) => Bridge::with_supervisor(settings, Supervisor::with_grace(g)),
        None => Bridge::new(settings),
    };
    BridgeServer::start(Arc::new(bridge), &addr).expect("start bridge")
}

/// Minimal raw HTTP sender over TCP returning the full response as a String.
#[allow(dead_code)]
pub fn http_send_raw(port: u16, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
    stream.write_all(request).expect("write failed");
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).to_string()
}

/// Split a raw response into (status, body JSON).
#[allow(dead_code)]
pub fn parse_json_response(resp: &str) -> (u16, Value) {
    let status = resp
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    let body = resp
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .unwrap_or_default();
    let v = serde_json::from_str(body)
        .unwrap_or_else(|e| panic!("response body is not JSON ({e}):\n{resp}"));
    (status, v)
}

#[allow(dead_code)]
pub fn http_post_json(port: u16, path: &str, body: &Value) -> (u16, Value) {
    let payload = serde_json::to_string(body).expect("serialize");
    let req = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    parse_json_response(&http_send_raw(port, req.as_bytes()))
}

#[allow(dead_code)]
pub fn http_get_json(port: u16, path: &str) -> (u16, Value) {
    let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    parse_json_response(&http_send_raw(port, req.as_bytes()))
}

/// Audit manifest files currently present in `dir`, sorted.
#[allow(dead_code)]
pub fn audit_manifests(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy().starts_with("bridge.manifest."))
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}
