use asyncproc_core::{NativeProcess, ProcessError, ProcessId, ProcessLauncher, SpawnedProcess, StartInfo};

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use asyncproc_core::{ExitRecord, OutputStream};
    use async_trait::async_trait;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Stdio};
    use std::time::{Duration, SystemTime};
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// How often an attached process is checked for liveness
    const ATTACHED_POLL_INTERVAL: Duration = Duration::from_millis(250);

    pub(crate) fn exit_record(status: ExitStatus) -> ExitRecord {
        let signal = status.signal();
        ExitRecord {
            code: status.code().or_else(|| signal.map(|s| 128 + s)),
            signal,
            exit_time: SystemTime::now(),
        }
    }

    /// Child process spawned by [`UnixProcessLauncher`]
    pub struct UnixChildProcess {
        child: Child,
        pid: ProcessId,
    }

    impl UnixChildProcess {
        pub fn new(child: Child, pid: ProcessId) -> Self {
            Self { child, pid }
        }
    }

    #[async_trait]
    impl NativeProcess for UnixChildProcess {
        fn pid(&self) -> ProcessId {
            self.pid
        }

        async fn wait(&mut self) -> Result<ExitRecord, ProcessError> {
            let status = self.child.wait().await?;
            debug!(pid = self.pid, status = %status, "Unix child process exited");
            Ok(exit_record(status))
        }

        fn start_kill(&mut self) -> Result<(), ProcessError> {
            self.child.start_kill().map_err(|e| {
                warn!(pid = self.pid, error = %e, "Failed to send SIGKILL");
                ProcessError::Other(anyhow::anyhow!("Failed to kill process {}: {e}", self.pid))
            })?;
            info!(pid = self.pid, "Sent SIGKILL to child process");
            Ok(())
        }
    }

    /// Process that is not a child of this one; exit is detected by polling
    pub struct UnixAttachedProcess {
        pid: ProcessId,
    }

    impl UnixAttachedProcess {
        pub fn new(pid: ProcessId) -> Self {
            Self { pid }
        }

        fn nix_pid(&self) -> NixPid {
            NixPid::from_raw(self.pid as i32)
        }
    }

    #[async_trait]
    impl NativeProcess for UnixAttachedProcess {
        fn pid(&self) -> ProcessId {
            self.pid
        }

        async fn wait(&mut self) -> Result<ExitRecord, ProcessError> {
            loop {
                // Send signal 0 to check if process exists
                match signal::kill(self.nix_pid(), None) {
                    Ok(()) | Err(Errno::EPERM) => tokio::time::sleep(ATTACHED_POLL_INTERVAL).await,
                    Err(Errno::ESRCH) => {
                        info!(pid = self.pid, "Attached process is no longer running");
                        return Ok(ExitRecord::unknown());
                    }
                    Err(e) => return Err(std::io::Error::from(e).into()),
                }
            }
        }

        fn start_kill(&mut self) -> Result<(), ProcessError> {
            match signal::kill(self.nix_pid(), Signal::SIGKILL) {
                Ok(()) => {
                    info!(pid = self.pid, "Sent SIGKILL to attached process");
                    Ok(())
                }
                Err(Errno::ESRCH) => Err(ProcessError::ProcessNotFound(self.pid)),
                Err(Errno::EPERM) => {
                    warn!(pid = self.pid, "Permission denied to kill process");
                    Err(ProcessError::PermissionDenied(format!("kill process {}", self.pid)))
                }
                Err(e) => Err(ProcessError::Other(anyhow::anyhow!("SIGKILL failed: {e}"))),
            }
        }
    }

    /// Spawns tokio child processes with both output streams piped
    #[derive(Debug, Default)]
    pub struct UnixProcessLauncher;

    impl UnixProcessLauncher {
        pub fn new() -> Self {
            Self
        }
    }

    impl ProcessLauncher for UnixProcessLauncher {
        fn spawn(&self, info: &StartInfo) -> Result<SpawnedProcess, ProcessError> {
            let args = info.argv();
            let mut cmd = Command::new(&info.program);
            cmd.args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            if let Some(dir) = &info.working_directory {
                cmd.current_dir(dir);
            }

            for (key, value) in &info.env {
                cmd.env(key, value);
            }

            let mut child = cmd
                .spawn()
                .map_err(|e| ProcessError::launch(info.program_name(), e))?;
            let start_time = SystemTime::now();
            let pid = child.id().ok_or_else(|| {
                ProcessError::Other(anyhow::anyhow!("spawned process reported no pid"))
            })?;

            let stdout = child.stdout.take().map(|s| Box::new(s) as OutputStream);
            let stderr = child.stderr.take().map(|s| Box::new(s) as OutputStream);

            info!(
                pid = pid,
                program = %info.program_name(),
                args = ?args,
                "Spawned Unix process"
            );

            Ok(SpawnedProcess {
                native: Box::new(UnixChildProcess::new(child, pid)),
                stdout,
                stderr,
                start_time,
            })
        }

        fn attach(&self, pid: ProcessId) -> Result<Box<dyn NativeProcess>, ProcessError> {
            match signal::kill(NixPid::from_raw(pid as i32), None) {
                Ok(()) | Err(Errno::EPERM) => Ok(Box::new(UnixAttachedProcess::new(pid))),
                Err(Errno::ESRCH) => Err(ProcessError::ProcessNotFound(pid)),
                Err(e) => Err(std::io::Error::from(e).into()),
            }
        }
    }

}

// Re-export the Unix implementation when on Unix systems
#[cfg(unix)]
pub use unix_impl::{UnixAttachedProcess, UnixChildProcess, UnixProcessLauncher};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
#[derive(Debug, Default)]
pub struct UnixProcessLauncher;

#[cfg(not(unix))]
impl UnixProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl ProcessLauncher for UnixProcessLauncher {
    fn spawn(&self, _info: &StartInfo) -> Result<SpawnedProcess, ProcessError> {
        Err(ProcessError::unsupported("Unix process launcher"))
    }

    fn attach(&self, _pid: ProcessId) -> Result<Box<dyn NativeProcess>, ProcessError> {
        Err(ProcessError::unsupported("Unix process launcher"))
    }
}
