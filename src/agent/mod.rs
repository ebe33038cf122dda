//! Agent invocation: tool policy and command-line construction.

pub mod supervisor;

pub use supervisor::{
    ExecutionOutcome, Supervisor, TimeoutState, Watchdog, WatchdogAction, DEFAULT_KILL_GRACE,
};

pub const PROMPT_FLAG: &str = "-p";
pub const ALLOW_ALL_FLAG: &str = "--allow-all-tools";
pub const ALLOW_TOOL_FLAG: &str = "--allow-tool";
pub const DENY_TOOL_FLAG: &str = "--deny-tool";

/// Tool permissions handed to the agent. Advisory: the bridge does not enforce them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPolicy {
    AllowAll,
    Explicit {
        allowed: Vec<String>,
        denied: Vec<String>,
    },
}

impl ToolPolicy {
    pub fn from_parts(allow_all: bool, allowed: Vec<String>, denied: Vec<String>) -> Self {
        if allow_all {
            ToolPolicy::AllowAll
        } else {
            ToolPolicy::Explicit { allowed, denied }
        }
    }

    pub fn allow_all(&self) -> bool {
        matches!(self, ToolPolicy::AllowAll)
    }

    pub fn allowed(&self) -> &[String] {
        match self {
            ToolPolicy::AllowAll => &[],
            ToolPolicy::Explicit { allowed, .. } => allowed,
        }
    }

    pub fn denied(&self) -> &[String] {
        match self {
            ToolPolicy::AllowAll => &[],
            ToolPolicy::Explicit { denied, .. } => denied,
        }
    }
}

/// Build the agent argv (without the executable): prompt first, then policy flags.
/// Allowed patterns come before denied ones, each in the order supplied.
pub fn build_agent_args(prompt: &str, policy: &ToolPolicy) -> Vec<String> {
    let mut args = vec![PROMPT_FLAG.to_string(), prompt.to_string()];
    match policy {
        ToolPolicy::AllowAll => args.push(ALLOW_ALL_FLAG.to_string()),
        ToolPolicy::Explicit { allowed, denied } => {
            for t in allowed {
                args.push(ALLOW_TOOL_FLAG.to_string());
                args.push(t.clone());
            }
            for t in denied {
                args.push(DENY_TOOL_FLAG.to_string());
                args.push(t.clone());
            }
        }
    }
    args
}
