//! Error mapping guide:
//! - Validation errors map to HTTP 400 and never reach the supervisor.
//! - Everything else that reaches the gateway maps to HTTP 500.
//! - A non-zero agent exit is not an error; it is reported as `ok: false` with HTTP 200.
use std::fmt;
use std::io;

/// Errors surfaced by the bridge to its HTTP callers.
#[derive(Debug)]
pub enum BridgeError {
    /// The request was rejected before any process was launched.
    Validation(String),
    /// The agent executable could not be started.
    Launch(io::Error),
    /// Bridge-side I/O, such as persisting the audit manifest.
    Io(io::Error),
}

impl From<io::Error> for BridgeError {
    fn from(e: io::Error) -> Self {
        BridgeError::Io(e)
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Validation(msg) => f.write_str(msg),
            BridgeError::Launch(e) => write!(f, "spawn error: {e}"),
            BridgeError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Launch(e) | BridgeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Map a BridgeError to the HTTP status code the gateway answers with.
pub fn http_status_for_error(e: &BridgeError) -> u16 {
    match e {
        BridgeError::Validation(_) => 400,
        BridgeError::Launch(_) | BridgeError::Io(_) => 500,
    }
}

/// Map an io::Error to a process exit code for the binary:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}
