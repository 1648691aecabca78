//! ipcluster: interactive control of one coordinator/engine cluster.
//!
//! Reads control lines from stdin:
//!
//! ```text
//! start -n 4 [--launcher local|srun|mpirun] [--overlay]
//! stop
//! status [--json]
//! shortcuts
//! exit
//! ```
//!
//! A ready cluster is stopped before the process exits, whether by `exit`,
//! end of input, or Ctrl-C at the prompt. Ctrl-C during a `start` or `stop`
//! abandons that command: its processes are signalled and the session is
//! left Stopped, and the prompt returns.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ipcluster_core::{ClusterSettings, ClusterState};
use ipcluster_lifecycle::ClusterController;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

mod commands;

use commands::{Flow, execute_until, parse_line};

#[derive(Parser)]
#[command(name = "ipcluster", about = "Start and stop an ad-hoc compute cluster", version)]
struct Cli {
    /// Settings file (default: ./ipcluster.toml if present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not print a prompt.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ipcluster=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = ClusterSettings::load(cli.config.as_deref()).context("loading settings")?;
    info!(
        coordinator = %settings.coordinator.program,
        engine = %settings.engine.program,
        registry_port = settings.coordinator.registry_port,
        "ipcluster control loop starting"
    );

    let controller = ClusterController::from_settings(&settings);
    let result = run(&controller, cli.quiet).await;

    if controller.state() == ClusterState::Ready {
        info!("stopping cluster before exit");
        match controller.stop().await {
            Ok(report) => println!("{}", commands::describe_stop(&report)),
            Err(e) => warn!(error = %e, "stop on exit failed"),
        }
    }
    result
}

async fn run(controller: &ClusterController, quiet: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        if !quiet {
            stdout.write_all(b"ipcluster> ").await?;
            stdout.flush().await?;
        }

        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                let interrupt = async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                };
                if execute_until(controller, command, interrupt).await == Flow::Exit {
                    break;
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}
