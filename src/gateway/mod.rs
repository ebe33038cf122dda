/*!
Request handling for the bridge endpoints.

`Bridge` owns the immutable settings and the process supervisor. `handle_run` validates a
run request, launches the agent, locates the agent's own manifest, writes the audit manifest
and shapes the JSON answer. Transport concerns live in `http` and `server`.
*/

pub mod http;
pub mod server;

pub use server::BridgeServer;

use serde::Deserialize;
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

use crate::agent::{build_agent_args, ExecutionOutcome, Supervisor, ToolPolicy};
use crate::config::Settings;
use crate::errors::{http_status_for_error, BridgeError};
use crate::locator::locate_agent_manifest;
use crate::manifest::{
    write_audit_manifest, AuditRecord, ExecSection, InputSection, ManifestRef, OutputSection,
    ResultSection, MANIFEST_VERSION,
};
use crate::util::{host_name, iso_timestamp, resolve_against, user_name};

pub const SERVICE_NAME: &str = "agent-bridge";

/// Wire shape of a run request. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequestBody {
    prompt: Option<Value>,
    #[serde(alias = "cwd")]
    working_directory: Option<String>,
    timeout_ms: Option<Value>,
    allow_all_tools: Option<bool>,
    allow_tools: Option<Vec<String>>,
    deny_tools: Option<Vec<String>>,
}

/// A validated run request with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub prompt: String,
    pub working_directory: PathBuf,
    pub timeout: Duration,
    pub policy: ToolPolicy,
}

pub struct Bridge {
    settings: Arc<Settings>,
    supervisor: Supervisor,
}

impl Bridge {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self::with_supervisor(settings, Supervisor::new())
    }

    pub fn with_supervisor(settings: Arc<Settings>, supervisor: Supervisor) -> Self {
        Self {
            settings,
            supervisor,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn health(&self) -> Value {
        json!({
            "ok": true,
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "pid": std::process::id(),
            "now": iso_timestamp(SystemTime::now()),
        })
    }

    /// Parse and validate a request body. Nothing is launched on failure.
    pub fn parse_run_request(&self, body: &[u8]) -> Result<RunRequest, BridgeError> {
        let raw: RunRequestBody = if body.iter().all(|b| b.is_ascii_whitespace()) {
            RunRequestBody::default()
        } else {
            serde_json::from_slice(body)
                .map_err(|e| BridgeError::Validation(format!("invalid JSON body: {e}")))?
        };

        let prompt = match raw.prompt {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                return Err(BridgeError::Validation(
                    "prompt (non-empty string) required".to_string(),
                ))
            }
        };

        let working_directory = match raw.working_directory.filter(|s| !s.trim().is_empty()) {
            Some(p) => resolve_against(&self.settings.root, Path::new(&p)),
            None => self.settings.default_cwd.clone(),
        };
        if !working_directory.is_dir() {
            return Err(BridgeError::Validation(format!(
                "workingDirectory does not exist or is not a directory: {}",
                working_directory.display()
            )));
        }

        let timeout_ms = match raw.timeout_ms {
            None | Some(Value::Null) => self.settings.default_timeout_ms,
            Some(v) => match v.as_u64() {
                Some(ms) if ms > 0 => ms,
                _ => {
                    return Err(BridgeError::Validation(
                        "timeoutMs must be a positive integer".to_string(),
                    ))
                }
            },
        };

        let policy = ToolPolicy::from_parts(
            raw.allow_all_tools.unwrap_or(self.settings.allow_all_tools),
            raw.allow_tools
                .unwrap_or_else(|| self.settings.allow_tools.clone()),
            raw.deny_tools
                .unwrap_or_else(|| self.settings.deny_tools.clone()),
        );

        Ok(RunRequest {
            prompt,
            working_directory,
            timeout: Duration::from_millis(timeout_ms),
            policy,
        })
    }

    /// Handle `POST /run`. Returns the HTTP status and the JSON payload.
    pub fn handle_run(&self, body: &[u8]) -> (u16, Value) {
        let req = match self.parse_run_request(body) {
            Ok(r) => r,
            Err(e) => {
                warn!("run rejected: {}", e);
                return (http_status_for_error(&e), error_body(&e.to_string()));
            }
        };

        let args = build_agent_args(&req.prompt, &req.policy);
        info!(
            "run start: cmd={} cwd={} timeout_ms={} allow_all={}",
            self.settings.agent_cmd,
            req.working_directory.display(),
            req.timeout.as_millis(),
            req.policy.allow_all()
        );
        let outcome = self.supervisor.run(
            &self.settings.agent_cmd,
            &args,
            &req.working_directory,
            req.timeout,
        );

        let agent_manifest =
            locate_agent_manifest(&req.working_directory, &self.settings.agent_manifest_prefix);
        let launch_error = outcome
            .launch_error
            .as_ref()
            .map(|text| BridgeError::Launch(io::Error::other(text.clone())));

        let record = self.audit_record(&req, &args, &outcome, &agent_manifest);
        let audit = match write_audit_manifest(&self.settings.manifest_dir, &record) {
            Ok(r) => r,
            Err(e) => {
                let e = BridgeError::from(e);
                error!(
                    "audit manifest write failed in {}: {}",
                    self.settings.manifest_dir.display(),
                    e
                );
                ManifestRef::empty()
            }
        };

        info!(
            "run end: exit_code={:?} signal={:?} killed_by_timeout={} duration_ms={} audit={}",
            outcome.exit_code,
            outcome.signal,
            outcome.killed_by_timeout,
            outcome.duration_ms(),
            audit.path
        );

        match launch_error {
            Some(e) => (http_status_for_error(&e), launch_error_body(&e, &outcome, &audit)),
            None => (200, run_result_body(&outcome, &agent_manifest, &audit)),
        }
    }

    fn audit_record(
        &self,
        req: &RunRequest,
        args: &[String],
        outcome: &ExecutionOutcome,
        agent_manifest: &ManifestRef,
    ) -> AuditRecord {
        AuditRecord {
            version: MANIFEST_VERSION,
            started_at: iso_timestamp(outcome.started_at),
            ended_at: iso_timestamp(outcome.ended_at),
            duration_ms: outcome.duration_ms(),
            host: host_name(),
            user: user_name(),
            pid: std::process::id(),
            exec: ExecSection {
                cmd: self.settings.agent_cmd.clone(),
                args: args.to_vec(),
                cwd: req.working_directory.display().to_string(),
                killed_by_timeout: outcome.killed_by_timeout,
            },
            input: InputSection {
                allow_all_tools: req.policy.allow_all(),
                allow_tools: req.policy.allowed().to_vec(),
                deny_tools: req.policy.denied().to_vec(),
                prompt_bytes: req.prompt.len(),
                timeout_ms: req.timeout.as_millis() as u64,
            },
            output: OutputSection {
                bytes_stdout: outcome.stdout.len(),
                bytes_stderr: outcome.stderr.len(),
            },
            result: ResultSection {
                exit_code: outcome.exit_code,
                signal: outcome.signal,
                error: outcome.launch_error.clone(),
            },
            agent_manifest: agent_manifest.clone(),
        }
    }
}

pub fn error_body(message: &str) -> Value {
    json!({ "ok": false, "error": message })
}

fn run_result_body(outcome: &ExecutionOutcome, agent: &ManifestRef, audit: &ManifestRef) -> Value {
    json!({
        "ok": outcome.success(),
        "exitCode": outcome.exit_code,
        "signal": outcome.signal,
        "killedByTimeout": outcome.killed_by_timeout,
        "stdout": String::from_utf8_lossy(&outcome.stdout),
        "stderr": String::from_utf8_lossy(&outcome.stderr),
        "bytesStdout": outcome.stdout.len(),
        "bytesStderr": outcome.stderr.len(),
        "startedAt": iso_timestamp(outcome.started_at),
        "endedAt": iso_timestamp(outcome.ended_at),
        "durationMs": outcome.duration_ms(),
        "agentManifestPath": agent.path,
        "agentManifestDigest": agent.digest,
        "auditManifestPath": audit.path,
        "auditManifestDigest": audit.digest,
    })
}

fn launch_error_body(err: &BridgeError, outcome: &ExecutionOutcome, audit: &ManifestRef) -> Value {
    let text = outcome.launch_error.clone().unwrap_or_default();
    json!({
        "ok": false,
        "error": err.to_string(),
        "exitCode": Value::Null,
        "signal": Value::Null,
        "killedByTimeout": false,
        "stdout": "",
        "stderr": text,
        "bytesStdout": 0,
        "bytesStderr": 0,
        "startedAt": iso_timestamp(outcome.started_at),
        "endedAt": iso_timestamp(outcome.ended_at),
        "durationMs": outcome.duration_ms(),
        "agentManifestPath": "",
        "agentManifestDigest": "",
        "auditManifestPath": audit.path,
        "auditManifestDigest": audit.digest,
    })
}
