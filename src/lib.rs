/*!
agent-bridge: a local HTTP gateway that runs a command-line coding agent.

Each `POST /run` launches the agent once with a prompt and a tool policy, enforces a
timeout (SIGTERM, then SIGKILL after a grace period), captures its output, fingerprints the
manifest the agent leaves behind, and writes a SHA-256 hashed audit manifest.

Modules:
- config: settings resolution (env, JSON file, defaults)
- digest: SHA-256 helpers
- manifest: audit manifest records and writer
- locator: discovery of the agent's own manifest
- agent: tool policy, argument construction and the process supervisor
- gateway: HTTP parsing, routing and the listener
- errors, telemetry, util: ambient helpers
*/

pub mod agent;
pub mod config;
pub mod digest;
pub mod errors;
pub mod gateway;
pub mod locator;
pub mod manifest;
pub mod telemetry;
pub mod util;

pub use agent::{build_agent_args, ExecutionOutcome, Supervisor, ToolPolicy};
pub use config::Settings;
pub use errors::BridgeError;
pub use gateway::{Bridge, BridgeServer};
pub use manifest::ManifestRef;
