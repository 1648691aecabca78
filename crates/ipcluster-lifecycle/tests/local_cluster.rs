//! End-to-end lifecycle against real child processes.
//!
//! The coordinator and engines are small shell scripts. Engines announce
//! themselves by creating a marker file; an in-process axum server plays
//! the coordinator's registry, counting markers and writing the shutdown
//! flag the scripts wait for.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use ipcluster_core::{ClusterSettings, ClusterState, LaunchConfig};
use ipcluster_lifecycle::{ClusterController, LifecycleError, ShutdownOutcome};

const COORDINATOR: &str = r#"#!/bin/sh
touch "$DIR/pid-$$"
while [ ! -f "$DIR/shutdown" ]; do sleep 0.05; done
"#;

const ENGINE: &str = r#"#!/bin/sh
touch "$DIR/pid-$$"
touch "$DIR/engine-$$"
while [ ! -f "$DIR/shutdown" ]; do sleep 0.05; done
rm -f "$DIR/engine-$$"
"#;

/// An engine that starts but never registers.
const SILENT_ENGINE: &str = r#"#!/bin/sh
touch "$DIR/pid-$$"
while [ ! -f "$DIR/shutdown" ]; do sleep 0.05; done
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Write an executable script into `scripts` whose `$DIR` is `work`.
fn write_script(scripts: &Path, work: &Path, name: &str, body: &str) -> PathBuf {
    let path = scripts.join(name);
    let script = body.replace("$DIR", &work.display().to_string());
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn engine_markers(dir: &Path) -> Vec<u32> {
    let count = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("engine-"))
        .count();
    (0..count as u32).collect()
}

/// Pids of every script that got as far as running.
fn started_pids(dir: &Path) -> Vec<i32> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().to_string_lossy().strip_prefix("pid-")?.parse().ok())
        .collect()
}

fn process_exists(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Registry that derives its state from the scripts' marker files.
async fn serve_registry(dir: PathBuf) -> u16 {
    let state = Arc::new(dir);
    let router = Router::new()
        .route("/registry/ping", get(|| async { "pong" }))
        .route(
            "/registry/engines",
            get(|State(dir): State<Arc<PathBuf>>| async move {
                Json(serde_json::json!({ "ids": engine_markers(&dir) }))
            }),
        )
        .route(
            "/registry/shutdown",
            post(|State(dir): State<Arc<PathBuf>>| async move {
                std::fs::write(dir.join("shutdown"), b"all").unwrap();
                StatusCode::OK
            }),
        )
        .route("/overlay/start", post(|| async { StatusCode::NOT_IMPLEMENTED }))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    port
}

async fn controller(work: &Path, scratch: &Path) -> ClusterController {
    controller_with(work, scratch, ENGINE, Duration::from_secs(10)).await
}

async fn controller_with(
    work: &Path,
    scratch: &Path,
    engine: &str,
    registration_timeout: Duration,
) -> ClusterController {
    let port = serve_registry(work.to_path_buf()).await;

    let mut settings = ClusterSettings::default();
    settings.coordinator.program = write_script(scratch, work, "coordinator.sh", COORDINATOR)
        .display()
        .to_string();
    settings.coordinator.registry_port = port;
    settings.engine.program = write_script(scratch, work, "engine.sh", engine)
        .display()
        .to_string();
    settings.launch.settle_delay = Duration::from_millis(100);
    settings.readiness.connect_timeout = Duration::from_secs(10);
    settings.readiness.registration_timeout = registration_timeout;
    settings.readiness.poll_interval = Duration::from_millis(50);
    settings.shutdown.poll_interval = Duration::from_millis(200);
    settings.shutdown.max_polls = 25;
    settings.overlay.descriptor_dir = Some(scratch.to_path_buf());

    ClusterController::from_settings(&settings)
}

#[tokio::test]
async fn two_local_engines_start_and_stop() {
    init_tracing();
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let controller = controller(work.path(), scratch.path()).await;

    let report = controller.start(LaunchConfig::local(2).unwrap()).await.unwrap();
    assert_eq!(controller.state(), ClusterState::Ready);
    assert_eq!(report.engine_ids, vec![0, 1]);

    let status = controller.status().await;
    assert_eq!(status.engine_pids.len(), 2);
    assert!(status.coordinator_pid.is_some());

    let stop = controller.stop().await.unwrap();
    assert!(matches!(stop.outcome, ShutdownOutcome::Complete { .. }));
    assert_eq!(controller.state(), ClusterState::Stopped);
    assert!(engine_markers(work.path()).is_empty());
}

#[tokio::test]
async fn missing_overlay_support_rolls_back_real_processes() {
    init_tracing();
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let controller = controller(work.path(), scratch.path()).await;

    let err = controller
        .start(LaunchConfig::parse(1, "local", true).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::OverlayActivationFailed(_)));
    assert_eq!(controller.state(), ClusterState::Stopped);

    let status = controller.status().await;
    assert!(status.engine_pids.is_empty());
    assert!(status.coordinator_pid.is_none());
}

#[tokio::test]
async fn silent_engines_time_out_without_survivors() {
    init_tracing();
    let work = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let controller =
        controller_with(work.path(), scratch.path(), SILENT_ENGINE, Duration::from_secs(1)).await;

    let err = controller.start(LaunchConfig::local(2).unwrap()).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::EngineTimeout { expected: 2, registered: 0, .. }
    ));
    assert_eq!(controller.state(), ClusterState::Stopped);

    // Rollback signals the scripts directly; the shutdown flag is never written.
    assert!(!work.path().join("shutdown").exists());
    let pids = started_pids(work.path());
    assert_eq!(pids.len(), 3);
    for pid in pids {
        assert!(!process_exists(pid), "process {pid} outlived the rollback");
    }
}
