use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use hotboot::api::boot_api::{self, ConsoleShell};
use hotboot::{BootConfig, BootOutcome, BuildInfo};

#[derive(Parser)]
#[command(name = "hotboot", version, about = "Self-updating client bootstrap")]
struct Cli {
    /// TOML config file; built-in defaults when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the boot sequence and keep the agent serving until Ctrl-C.
    Boot,
    /// Re-download the client bundle on the next boot.
    ResetBuild,
    /// Clear all local state and cache regions on the next boot.
    ResetAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    boot_api::init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BootConfig::from_toml_file(path)?,
        None => BootConfig::default(),
    };

    match cli.command.unwrap_or(Command::Boot) {
        Command::Boot => run_boot(config).await,
        Command::ResetBuild => Ok(boot_api::reset_build(&config)?),
        Command::ResetAll => Ok(boot_api::reset_all(&config)?),
    }
}

async fn run_boot(config: BootConfig) -> Result<()> {
    let shell = Arc::new(ConsoleShell::new());
    let sequencer = boot_api::assemble(config, BuildInfo::embedded(), shell.clone())?;
    let ctx = boot_api::entry_context(&sequencer)?;

    match sequencer.run(ctx).await {
        Ok(BootOutcome::HandedOff(handoff)) => {
            info!(
                "control handed to {} (pid {:?})",
                handoff.version, handoff.pid
            );
            Ok(())
        }
        Ok(BootOutcome::Ready(report)) => {
            info!(
                "ready: build {} ({}) via agent {:?}, version outcome {:?}",
                report.build.version,
                report.build.build_date,
                report.registration.addr,
                report.version
            );
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            Ok(())
        }
        Err(e) => {
            if shell.reload_requested() {
                warn!("reload requested; restart the client to try again");
            }
            Err(e.into())
        }
    }
}
