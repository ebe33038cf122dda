use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Start the HTTP bridge (default)
    Serve,
    /// Print resolved settings and check that the agent executable is on PATH
    Doctor,
}

#[derive(Parser, Debug)]
#[command(
    name = "agent-bridge",
    version,
    about = "Local HTTP bridge that runs a command-line coding agent and records an audit manifest per run.",
    after_long_help = "Examples:\n  agent-bridge\n  agent-bridge --root /srv/bridge --verbose serve\n  BRIDGE_PORT=8080 agent-bridge doctor\n"
)]
pub(crate) struct Cli {
    /// Project root for relative paths, `.env` and `config/bridge.config.json` (overrides BRIDGE_ROOT)
    #[arg(long, value_name = "DIR")]
    pub(crate) root: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short = 'v')]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

impl Cli {
    pub(crate) fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::try_parse_from(["agent-bridge"]).expect("parse");
        assert_eq!(cli.command(), Command::Serve);
        assert!(!cli.verbose);
        assert!(cli.root.is_none());
    }

    #[test]
    fn test_root_and_doctor() {
        let cli = Cli::try_parse_from(["agent-bridge", "--root", "/srv/b", "-v", "doctor"])
            .expect("parse");
        assert_eq!(cli.command(), Command::Doctor);
        assert!(cli.verbose);
        assert_eq!(cli.root.as_deref(), Some(std::path::Path::new("/srv/b")));
    }
}
