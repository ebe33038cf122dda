/*!
Process supervisor: launch the agent, capture its output, enforce the deadline.

Timeout model (per run):
- `Running` until the deadline; then SIGTERM to the agent's process group and `Grace`.
- If still alive when the grace period ends, SIGKILL and `Dead`.
- A natural exit at any point cancels both deadlines (`Exited`).

The owning thread polls `try_wait`, so signals are only ever sent to an unreaped child.
When the leader exits, whatever is left of its process group is killed, and the output
pipes get at most one grace period to close before partial output is returned.
Launch failures are reported in the outcome (`exit_code: None`, `launch_error: Some(..)`).
*/

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::util::millis_between;

pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(5000);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Running,
    Grace,
    Dead,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    Terminate,
    Kill,
}

/// Deadline bookkeeping for one run: two cancellable deadlines and an explicit state.
#[derive(Debug, Clone)]
pub struct Watchdog {
    state: TimeoutState,
    deadline: Option<Instant>,
    grace: Duration,
    grace_deadline: Option<Instant>,
    fired_before_exit: bool,
}

impl Watchdog {
    pub fn arm(start: Instant, timeout: Duration, grace: Duration) -> Self {
        Watchdog {
            state: TimeoutState::Running,
            deadline: Some(start + timeout),
            grace,
            grace_deadline: None,
            fired_before_exit: false,
        }
    }

    pub fn state(&self) -> TimeoutState {
        self.state
    }

    /// True once the deadline has fired, whatever happened afterwards.
    pub fn killed_by_timeout(&self) -> bool {
        match self.state {
            TimeoutState::Grace | TimeoutState::Dead => true,
            TimeoutState::Running => false,
            TimeoutState::Exited => self.fired_before_exit,
        }
    }

    /// Advance the state machine to `now`; returns the signal to send, if any.
    pub fn poll(&mut self, now: Instant) -> Option<WatchdogAction> {
        match self.state {
            TimeoutState::Running => match self.deadline {
                Some(d) if now >= d => {
                    self.deadline = None;
                    self.grace_deadline = Some(now + self.grace);
                    self.state = TimeoutState::Grace;
                    Some(WatchdogAction::Terminate)
                }
                _ => None,
            },
            TimeoutState::Grace => match self.grace_deadline {
                Some(d) if now >= d => {
                    self.grace_deadline = None;
                    self.state = TimeoutState::Dead;
                    Some(WatchdogAction::Kill)
                }
                _ => None,
            },
            TimeoutState::Dead | TimeoutState::Exited => None,
        }
    }

    /// The process is gone: cancel pending deadlines. `Dead` stays terminal.
    pub fn exited(&mut self) {
        self.deadline = None;
        self.grace_deadline = None;
        if self.state != TimeoutState::Dead {
            self.fired_before_exit = self.state == TimeoutState::Grace;
            self.state = TimeoutState::Exited;
        }
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline.or(self.grace_deadline)
    }
}

/// Final result of one supervised run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub killed_by_timeout: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub launch_error: Option<String>,
}

impl ExecutionOutcome {
    fn launch_failure(started_at: SystemTime, error: String) -> Self {
        ExecutionOutcome {
            exit_code: None,
            signal: None,
            killed_by_timeout: false,
            stdout: Vec::new(),
            stderr: Vec::new(),
            started_at,
            ended_at: SystemTime::now(),
            launch_error: Some(error),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        millis_between(self.started_at, self.ended_at)
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn launched(&self) -> bool {
        self.launch_error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    grace: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Override the grace period between SIGTERM and SIGKILL.
    pub fn with_grace(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Run `cmd args...` in `cwd` with the inherited environment, no shell involved.
    pub fn run(&self, cmd: &str, args: &[String], cwd: &Path, timeout: Duration) -> ExecutionOutcome {
        let started_at = SystemTime::now();

        let mut command = Command::new(cmd);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so termination reaches everything the agent spawned.
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                warn!("agent spawn failed: cmd={} cwd={}: {}", cmd, cwd.display(), e);
                return ExecutionOutcome::launch_failure(started_at, e.to_string());
            }
        };
        let pid = child.id();
        debug!("agent spawned pid={} cwd={}", pid, cwd.display());

        let out = child.stdout.take().map(Capture::spawn);
        let err = child.stderr.take().map(Capture::spawn);

        let mut watchdog = Watchdog::arm(Instant::now(), timeout, self.grace);
        let status = wait_with_watchdog(&mut child, &mut watchdog);
        kill_leftover_group(pid);

        let drain_until = Instant::now() + self.grace;
        let open = |c: &Option<Capture>| c.as_ref().is_some_and(|c| !c.is_finished());
        while (open(&out) || open(&err)) && Instant::now() < drain_until {
            thread::sleep(POLL_INTERVAL);
        }
        if open(&out) || open(&err) {
            warn!(
                "agent pid={} output pipes still open after exit; returning partial output",
                pid
            );
        }

        let stdout = out.map(Capture::finish).unwrap_or_default();
        let stderr = err.map(Capture::finish).unwrap_or_default();
        let ended_at = SystemTime::now();

        let (exit_code, signal) = match status {
            Some(st) => (st.code(), exit_signal(&st)),
            None => (None, None),
        };
        debug!(
            "agent pid={} finished exit_code={:?} signal={:?} state={:?}",
            pid,
            exit_code,
            signal,
            watchdog.state()
        );

        ExecutionOutcome {
            exit_code,
            signal,
            killed_by_timeout: watchdog.killed_by_timeout(),
            stdout,
            stderr,
            started_at,
            ended_at,
            launch_error: None,
        }
    }
}

fn wait_with_watchdog(child: &mut Child, watchdog: &mut Watchdog) -> Option<ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                watchdog.exited();
                return Some(status);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("agent pid={} wait failed: {}", child.id(), e);
                let _ = child.kill();
                let status = child.wait().ok();
                watchdog.exited();
                return status;
            }
        }

        let now = Instant::now();
        if let Some(action) = watchdog.poll(now) {
            send_action(child, action);
        }

        let nap = watchdog
            .next_deadline()
            .map(|d| d.saturating_duration_since(now).min(POLL_INTERVAL))
            .unwrap_or(POLL_INTERVAL)
            .max(Duration::from_millis(1));
        thread::sleep(nap);
    }
}

#[cfg(unix)]
fn send_action(child: &mut Child, action: WatchdogAction) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let sig = match action {
        WatchdogAction::Terminate => Signal::SIGTERM,
        WatchdogAction::Kill => Signal::SIGKILL,
    };
    let pid = Pid::from_raw(child.id() as i32);
    warn!("agent timeout: sending {} to pid={}", sig.as_str(), pid);
    if killpg(pid, sig).is_err() {
        let _ = kill(pid, sig);
    }
}

#[cfg(not(unix))]
fn send_action(child: &mut Child, action: WatchdogAction) {
    warn!("agent timeout: {:?} pid={}", action, child.id());
    let _ = child.kill();
}

/// SIGKILL whatever is left in the agent's process group once the leader is gone.
#[cfg(unix)]
fn kill_leftover_group(pgid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL).is_ok() {
        debug!("killed leftover processes in agent group {}", pgid);
    }
}

#[cfg(not(unix))]
fn kill_leftover_group(_pgid: u32) {}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Output of one stream, accumulated by a reader thread in arrival order.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl Capture {
    fn spawn<R: Read + Send + 'static>(mut stream: R) -> Capture {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let handle = thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut b) => b.extend_from_slice(&chunk[..n]),
                        Err(p) => p.into_inner().extend_from_slice(&chunk[..n]),
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
        Capture { buf, handle }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Take what was read so far. A reader still blocked on an open pipe is left detached.
    fn finish(self) -> Vec<u8> {
        if self.handle.is_finished() {
            let _ = self.handle.join();
        }
        let mut guard = match self.buf.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        std::mem::take(&mut *guard)
    }
}
