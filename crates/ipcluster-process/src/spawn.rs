//! Process creation seam.
//!
//! [`Spawn`] is what the launcher calls to create processes and to check
//! that an external launcher binary exists. [`OsSpawner`] is the real
//! implementation on top of `tokio::process`.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::handle::{ProcessControl, ProcessHandle, ProcessStatus};

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-style rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Creates processes and resolves program names. Injected for testability.
pub trait Spawn: Send + Sync {
    /// Start `command` without waiting for it.
    fn spawn(&self, label: &str, command: &CommandSpec) -> io::Result<ProcessHandle>;

    /// Resolve `program` to an executable path, if it exists.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Spawns real OS processes through `tokio::process`.
///
/// Stdio is detached since the coordinator and engines log to files.
/// Dropping a handle does not kill the child: processes that outlive a
/// shutdown stay up for the operator to reclaim.
#[derive(Debug, Default, Clone)]
pub struct OsSpawner;

impl Spawn for OsSpawner {
    fn spawn(&self, label: &str, command: &CommandSpec) -> io::Result<ProcessHandle> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!(%label, pid = ?child.id(), command = %command.display(), "spawned process");
        Ok(ProcessHandle::new(label, Box::new(ChildProcess::new(child))))
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        find_executable(program, std::env::var_os("PATH").as_deref())
    }
}

/// A tokio child process behind [`ProcessControl`].
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    exited: Option<ProcessStatus>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            exited: None,
        }
    }
}

impl ProcessControl for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_status(&mut self) -> io::Result<ProcessStatus> {
        if let Some(status) = self.exited {
            return Ok(status);
        }
        match self.child.try_wait()? {
            Some(exit) => {
                let status = ProcessStatus::Exited(exit.code());
                self.exited = Some(status);
                Ok(status)
            }
            None => Ok(ProcessStatus::Running),
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.try_status()?.is_terminal() {
            return Ok(());
        }
        send_term(&mut self.child, self.pid)
    }
}

#[cfg(unix)]
fn send_term(_child: &mut Child, pid: Option<u32>) -> io::Result<()> {
    let Some(pid) = pid else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn send_term(child: &mut Child, _pid: Option<u32>) -> io::Result<()> {
    child.start_kill()
}

/// Resolve a program the way a shell would: paths are checked directly,
/// bare names are searched on `path_var`.
pub fn find_executable(program: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }
    std::env::split_paths(path_var?)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_exit(handle: &mut ProcessHandle) -> ProcessStatus {
        for _ in 0..100 {
            let status = handle.try_status().unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} did not exit", handle.label());
    }

    #[test]
    fn command_display_joins_args() {
        let cmd = CommandSpec::new("srun").args(["-n", "4"]).arg("ipengine");
        assert_eq!(cmd.display(), "srun -n 4 ipengine");
    }

    #[tokio::test]
    async fn spawned_process_reports_running_then_exit() {
        let spawner = OsSpawner;
        let mut handle = spawner
            .spawn("sleeper", &CommandSpec::new("sleep").arg("30"))
            .unwrap();
        assert!(handle.pid().is_some());
        assert_eq!(handle.try_status().unwrap(), ProcessStatus::Running);

        handle.terminate().unwrap();
        assert_eq!(wait_for_exit(&mut handle).await, ProcessStatus::Exited(None));
    }

    #[tokio::test]
    async fn terminate_after_exit_is_noop() {
        let spawner = OsSpawner;
        let mut handle = spawner.spawn("true", &CommandSpec::new("true")).unwrap();
        assert_eq!(wait_for_exit(&mut handle).await, ProcessStatus::Exited(Some(0)));
        handle.terminate().unwrap();
        assert_eq!(handle.try_status().unwrap(), ProcessStatus::Exited(Some(0)));
    }

    #[tokio::test]
    async fn spawning_missing_program_fails() {
        let spawner = OsSpawner;
        let err = spawner
            .spawn("ghost", &CommandSpec::new("/nonexistent/ipcluster-ghost"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn find_executable_searches_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("fake-srun");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let path_var = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_executable("fake-srun", Some(&path_var)), Some(bin.clone()));
        assert_eq!(find_executable("fake-mpirun", Some(&path_var)), None);
        assert_eq!(find_executable(bin.to_str().unwrap(), None), Some(bin));
        assert_eq!(find_executable("fake-srun", None), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_not_found() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("srun");
        std::fs::write(&bin, "").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();
        let path_var = std::env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_executable("srun", Some(&path_var)), None);
    }
}
