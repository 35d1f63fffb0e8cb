// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

mod config;
mod daemon;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use config::{verify_config, GuardConfig};
use daemon::Guard;
use ghaf_usb_shield::exec::SystemRunner;
use ghaf_usb_shield::status::StatusBoard;
use ghaf_usb_shield::util::{init_logger, wait_for_shutdown};
use ghaf_usb_shield::volumes::MountTable;

/// Covers a worst-case tick: three mechanism timeouts plus the probes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "usb-shield-gate")]
#[command(about = "Write-protection guard daemon for removable volumes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    /// Start the daemon
    Run {
        /// Configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        debug: bool,
        /// Disable the protection mechanisms (watch and verify only)
        #[arg(long)]
        no_protect: bool,
    },
    /// Verify configuration file without starting daemon
    Verify {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            debug,
            no_protect,
        } => {
            init_logger(debug)?;

            let mut config =
                GuardConfig::load(config.as_deref()).context("Failed to load configuration")?;

            if no_protect {
                log::info!("Protection mechanisms disabled via --no-protect flag");
                config.protection.enable = false;
            }

            let board = Arc::new(StatusBoard::new());
            let guard = Guard::new(
                config,
                Arc::new(MountTable::new()),
                Arc::new(SystemRunner),
                board,
            );

            let shutdown = CancellationToken::new();
            let task = tokio::spawn(guard.run(shutdown.clone()));

            wait_for_shutdown().await?;
            shutdown.cancel();

            // Let a tick in flight finish its pipeline before giving up.
            let abort = task.abort_handle();
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(join) => join.context("Guard task failed")?,
                Err(_) => {
                    log::warn!("Guard did not stop within {SHUTDOWN_GRACE:?}, aborting");
                    abort.abort();
                }
            }

            Ok(())
        }
        Commands::Verify { config } => verify_config(&config)
            .with_context(|| format!("Failed to verify configuration file {}", config.display())),
    }
}
