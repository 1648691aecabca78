//! Job-id capture for batch launches.
//!
//! A batch wrapper may write its scheduler job id into a file once the
//! allocation is granted. `JobIdWatch` polls that file in a background
//! task that ends on the first non-empty read, on its deadline, or when
//! cancelled. Dropping the watch cancels it.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a background job-id poll.
#[derive(Debug)]
pub struct JobIdWatch {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Option<String>>>,
    job_id: Option<String>,
}

impl JobIdWatch {
    /// Start polling `path` every `interval` until `timeout` elapses.
    pub fn spawn(path: PathBuf, interval: Duration, timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            poll_job_id(path, interval, timeout, shutdown_rx).await
        });
        Self {
            shutdown_tx,
            task: Some(task),
            job_id: None,
        }
    }

    /// The job id, if the poll has already produced one. Never blocks.
    pub async fn current(&mut self) -> Option<&str> {
        if self.job_id.is_none() && self.task.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(task) = self.task.take() {
                self.job_id = task.await.ok().flatten();
            }
        }
        self.job_id.as_deref()
    }

    /// Wait for the poll to finish and return its result.
    pub async fn wait(mut self) -> Option<String> {
        if let Some(task) = self.task.take() {
            self.job_id = task.await.ok().flatten();
        }
        self.job_id.take()
    }

    /// Stop polling. Idempotent.
    pub fn cancel(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for JobIdWatch {
    fn drop(&mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn poll_job_id(
    path: PathBuf,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Option<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let id = content.trim();
                if !id.is_empty() {
                    info!(job_id = %id, path = ?path, "job id captured");
                    return Some(id.to_string());
                }
            }
            Err(e) => debug!(path = ?path, error = %e, "job id file not readable yet"),
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                warn!(path = ?path, ?timeout, "no job id written before deadline");
                return None;
            }
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!(path = ?path, "job id poll cancelled");
                return None;
            }
        }
    }
}
