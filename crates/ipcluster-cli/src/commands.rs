//! Control-line grammar and command execution.

use clap::{Parser, Subcommand};
use ipcluster_core::LaunchConfig;
use ipcluster_lifecycle::{
    ClusterController, LifecycleError, ShutdownOutcome, StartReport, StatusReport, StopReport,
};
use tracing::{debug, warn};

/// One line typed at the control prompt.
#[derive(Parser, Debug)]
#[command(name = "ipcluster", no_binary_name = true, disable_version_flag = true)]
pub struct ControlLine {
    #[command(subcommand)]
    pub command: Control,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Control {
    /// Start a cluster and wait until every engine has registered.
    Start {
        /// Number of engines.
        #[arg(short = 'n', long = "num-engines")]
        num_engines: u32,
        /// local, srun or mpirun.
        #[arg(short, long, default_value = "local")]
        launcher: String,
        /// Turn the engines into a task-scheduling overlay once ready.
        #[arg(long)]
        overlay: bool,
    },
    /// Stop the running cluster.
    Stop,
    /// Show the cluster state.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List shortcuts available while the cluster is ready.
    Shortcuts,
    /// Stop any running cluster and quit.
    #[command(alias = "quit")]
    Exit,
}

/// What the control loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Control>, clap::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    ControlLine::try_parse_from(line.split_whitespace()).map(|parsed| Some(parsed.command))
}

/// Run `command` unless `interrupt` completes first. An abandoned start or
/// stop reclaims its processes and leaves the session Stopped.
pub async fn execute_until(
    controller: &ClusterController,
    command: Control,
    interrupt: impl Future<Output = ()>,
) -> Flow {
    tokio::select! {
        flow = execute(controller, command) => flow,
        () = interrupt => {
            warn!(state = %controller.state(), "interrupted, command abandoned");
            Flow::Continue
        }
    }
}

pub async fn execute(controller: &ClusterController, command: Control) -> Flow {
    debug!(?command, "executing control command");
    match command {
        Control::Start {
            num_engines,
            launcher,
            overlay,
        } => {
            let result = match LaunchConfig::parse(num_engines, &launcher, overlay) {
                Ok(config) => controller.start(config).await,
                Err(e) => Err(LifecycleError::from(e)),
            };
            match result {
                Ok(report) => println!("{}", describe_start(&report)),
                Err(e) => eprintln!("start failed: {e}"),
            }
        }
        Control::Stop => match controller.stop().await {
            Ok(report) => println!("{}", describe_stop(&report)),
            Err(e) => eprintln!("stop failed: {e}"),
        },
        Control::Status { json } => {
            let status = controller.status().await;
            if json {
                println!("{}", status_json(&status));
            } else {
                println!("{}", describe_status(&status));
            }
        }
        Control::Shortcuts => {
            let shortcuts = controller.shortcuts();
            let names = shortcuts.names();
            if names.is_empty() {
                println!("no shortcuts (cluster not ready)");
            }
            for name in names {
                let description = shortcuts.describe(&name).unwrap_or_default();
                println!("%{name:<10} {description}");
            }
        }
        Control::Exit => return Flow::Exit,
    }
    Flow::Continue
}

pub fn describe_start(report: &StartReport) -> String {
    let mut out = format!(
        "cluster ready: {} engines via {} at {} ({:.1}s)",
        report.engine_ids.len(),
        report.config.launcher(),
        report.registry_endpoint,
        report.elapsed.as_secs_f64(),
    );
    if let Some(overlay) = &report.overlay {
        out.push_str(&format!(
            "\noverlay scheduler at {}\n  reattach with: {}",
            overlay.scheduler_address(),
            overlay.connect_hint()
        ));
    }
    out
}

pub fn describe_stop(report: &StopReport) -> String {
    match &report.outcome {
        ShutdownOutcome::Complete { .. } => "cluster stopped".to_string(),
        ShutdownOutcome::Incomplete { alive } => {
            let mut out = format!(
                "cluster stopped, but these processes are still running: {}",
                alive.join(", ")
            );
            if let Some(job_id) = &report.job_id {
                out.push_str(&format!("\n  cancel the batch job with: scancel {job_id}"));
            }
            out
        }
    }
}

pub fn describe_status(status: &StatusReport) -> String {
    let mut out = format!("state: {}", status.state);
    if !status.detailed {
        out.push_str(" (busy)");
        return out;
    }
    if let Some(config) = &status.config {
        out.push_str(&format!(
            "\nengines: {} via {}",
            config.num_engines(),
            config.launcher()
        ));
    }
    if let Some(pid) = status.coordinator_pid {
        out.push_str(&format!("\ncoordinator pid: {pid}"));
    }
    if !status.engine_pids.is_empty() {
        let pids: Vec<String> = status.engine_pids.iter().map(u32::to_string).collect();
        out.push_str(&format!("\nengine pids: {}", pids.join(" ")));
    }
    if let Some(endpoint) = &status.registry_endpoint {
        out.push_str(&format!("\nregistry: {endpoint}"));
    }
    if let Some(overlay) = &status.overlay {
        out.push_str(&format!(
            "\noverlay: {} ({})",
            overlay.scheduler_address(),
            overlay.status()
        ));
    }
    if let Some(job_id) = &status.job_id {
        out.push_str(&format!("\njob id: {job_id}"));
    }
    out
}

pub fn status_json(status: &StatusReport) -> serde_json::Value {
    serde_json::json!({
        "state": status.state.label(),
        "detailed": status.detailed,
        "config": status.config,
        "coordinator_pid": status.coordinator_pid,
        "engine_pids": status.engine_pids,
        "registry_endpoint": status.registry_endpoint,
        "overlay": status.overlay.as_ref().map(|o| serde_json::json!({
            "scheduler_address": o.scheduler_address(),
            "dashboard_address": o.dashboard_address(),
            "descriptor": o.descriptor_path(),
            "status": o.status().to_string(),
        })),
        "shortcuts": status.shortcuts,
        "job_id": status.job_id,
    })
}
