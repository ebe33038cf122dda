use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use agent_bridge::config::{project_root, Settings};
use agent_bridge::errors::exit_code_for_io_error;
use agent_bridge::gateway::{Bridge, BridgeServer};
use agent_bridge::telemetry::{telemetry_init, with_startup_logging};

mod cli;

use cli::{Cli, Command};

fn build_info() -> String {
    format!(
        "version={} build={} target={} profile={} rustc={}",
        env!("CARGO_PKG_VERSION"),
        env!("BRIDGE_BUILD_DATE"),
        env!("BRIDGE_BUILD_TARGET"),
        env!("BRIDGE_BUILD_PROFILE"),
        env!("BRIDGE_BUILD_RUSTC"),
    )
}

fn run_doctor(settings: &Settings) {
    eprintln!("agent-bridge doctor");
    eprintln!("  {}", build_info());
    eprintln!("  host: {} / {}", std::env::consts::OS, std::env::consts::ARCH);
    eprintln!("  root: {}", settings.root.display());
    eprintln!("  listen: {}", settings.listen_addr());
    eprintln!("  default cwd: {}", settings.default_cwd.display());
    eprintln!("  default timeout: {} ms", settings.default_timeout_ms);
    eprintln!("  allow all tools: {}", settings.allow_all_tools);
    eprintln!("  allow tools: {}", settings.allow_tools.join(", "));
    eprintln!("  deny tools: {}", settings.deny_tools.join(", "));
    eprintln!("  manifest dir: {}", settings.manifest_dir.display());
    eprintln!("  log dir: {}", settings.log_dir.display());
    match which::which(&settings.agent_cmd) {
        Ok(p) => eprintln!("  agent: {} ({})", settings.agent_cmd, p.display()),
        Err(e) => eprintln!("  agent: {} not found ({e})", settings.agent_cmd),
    }
    eprintln!(
        "  agent manifest prefix: {}",
        settings.agent_manifest_prefix
    );
}

fn serve(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    let addr = settings.listen_addr();
    let bridge = Arc::new(Bridge::new(settings.clone()));
    let server = BridgeServer::start(bridge, &addr)
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("agent-bridge {}", build_info());
    info!("bridge on {}", server.url());
    info!("default cwd: {}", settings.default_cwd.display());
    info!("manifests: {}", settings.manifest_dir.display());
    server.join();
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let root = project_root(cli.root.as_deref()).context("cannot determine project root")?;
    let settings = with_startup_logging(cli.verbose, || Settings::load(&root))
        .with_context(|| format!("failed to prepare directories under {}", root.display()))?;

    if cli.command() == Command::Doctor {
        run_doctor(&settings);
        return Ok(());
    }
    telemetry_init(&settings.log_dir, cli.verbose);
    serve(settings)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("agent-bridge: {:#}", e);
            let code = e
                .downcast_ref::<std::io::Error>()
                .map(exit_code_for_io_error)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
