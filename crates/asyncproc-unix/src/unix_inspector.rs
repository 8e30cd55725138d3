use asyncproc_core::{PriorityClass, ProcessError, ProcessId, ProcessInspector, ProcessSnapshot};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Reads process properties through sysinfo and adjusts priorities through rustix
pub struct UnixProcessInspector {
    system: Mutex<System>,
}

impl Default for UnixProcessInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl UnixProcessInspector {
    pub fn new() -> Self {
        debug!("Initializing Unix process inspector");
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn lock_system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(process: &sysinfo::Process) -> ProcessSnapshot {
        let pid = process.pid().as_u32();
        let disk = process.disk_usage();
        let mut threads: Vec<ProcessId> = process
            .tasks()
            .map(|tasks| tasks.iter().map(|task| task.as_u32()).collect())
            .unwrap_or_default();
        threads.sort_unstable();

        ProcessSnapshot {
            pid,
            parent: process.parent().map(|p| p.as_u32()),
            name: process.name().to_string_lossy().into_owned(),
            executable: process.exe().map(|p| p.to_path_buf()),
            command_line: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
            working_directory: process.cwd().map(|p| p.to_path_buf()),
            status: process.status().to_string(),
            responding: !matches!(
                process.status(),
                ProcessStatus::Stop | ProcessStatus::Zombie | ProcessStatus::Dead
            ),
            memory_bytes: process.memory(),
            virtual_memory_bytes: process.virtual_memory(),
            cpu_usage: process.cpu_usage(),
            start_time: SystemTime::UNIX_EPOCH + Duration::from_secs(process.start_time()),
            run_time: Duration::from_secs(process.run_time()),
            threads,
            handle_count: open_handle_count(pid),
            session_id: process.session_id().map(|p| p.as_u32()),
            disk_read_bytes: disk.total_read_bytes,
            disk_written_bytes: disk.total_written_bytes,
        }
    }
}

#[cfg(target_os = "linux")]
fn open_handle_count(pid: ProcessId) -> Option<usize> {
    std::fs::read_dir(format!("/proc/{pid}/fd"))
        .ok()
        .map(|entries| entries.count())
}

#[cfg(not(target_os = "linux"))]
fn open_handle_count(_pid: ProcessId) -> Option<usize> {
    None
}

impl ProcessInspector for UnixProcessInspector {
    fn snapshot(&self, pid: ProcessId) -> Result<ProcessSnapshot, ProcessError> {
        let mut system = self.lock_system();
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        system
            .process(sys_pid)
            .map(Self::snapshot_of)
            .ok_or(ProcessError::ProcessNotFound(pid))
    }

    fn list(&self) -> Result<Vec<ProcessSnapshot>, ProcessError> {
        let mut system = self.lock_system();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        // Linux reports threads as processes too
        let mut snapshots: Vec<ProcessSnapshot> = system
            .processes()
            .values()
            .filter(|process| process.thread_kind().is_none())
            .map(Self::snapshot_of)
            .collect();
        snapshots.sort_by_key(|s| s.pid);
        debug!(count = snapshots.len(), "Enumerated processes");
        Ok(snapshots)
    }

    fn current_pid(&self) -> Result<ProcessId, ProcessError> {
        Ok(std::process::id())
    }

    fn machine_name(&self) -> String {
        host_name().unwrap_or_else(|| "localhost".to_string())
    }

    fn priority(&self, pid: ProcessId) -> Result<PriorityClass, ProcessError> {
        nice::get(pid).map(PriorityClass::from_nice)
    }

    fn set_priority(&self, pid: ProcessId, priority: PriorityClass) -> Result<(), ProcessError> {
        nice::set(pid, priority.nice()).inspect_err(|e| {
            warn!(pid = pid, priority = ?priority, error = %e, "Failed to change process priority");
        })
    }
}

#[cfg(unix)]
fn host_name() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn host_name() -> Option<String> {
    System::host_name()
}

#[cfg(unix)]
mod nice {
    use asyncproc_core::{ProcessError, ProcessId};
    use rustix::io::Errno;
    use rustix::process::{Pid, getpriority_process, setpriority_process};

    fn error(pid: ProcessId, errno: Errno) -> ProcessError {
        match errno {
            Errno::SRCH => ProcessError::ProcessNotFound(pid),
            Errno::PERM | Errno::ACCESS => {
                ProcessError::PermissionDenied(format!("change priority of process {pid}"))
            }
            other => ProcessError::Io(std::io::Error::from(other)),
        }
    }

    // pid 0 has no Pid and already means the calling process
    fn target(pid: ProcessId) -> Option<Pid> {
        Pid::from_raw(pid as i32)
    }

    pub(super) fn get(pid: ProcessId) -> Result<i32, ProcessError> {
        getpriority_process(target(pid)).map_err(|e| error(pid, e))
    }

    pub(super) fn set(pid: ProcessId, nice: i32) -> Result<(), ProcessError> {
        setpriority_process(target(pid), nice).map_err(|e| error(pid, e))
    }
}

#[cfg(not(unix))]
mod nice {
    use asyncproc_core::{ProcessError, ProcessId};

    pub(super) fn get(_pid: ProcessId) -> Result<i32, ProcessError> {
        Err(ProcessError::unsupported("nice values"))
    }

    pub(super) fn set(_pid: ProcessId, _nice: i32) -> Result<(), ProcessError> {
        Err(ProcessError::unsupported("nice values"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_of_current_process() {
        let inspector = UnixProcessInspector::new();
        let pid = inspector.current_pid().unwrap();
        let snapshot = inspector.snapshot(pid).unwrap();

        assert_eq!(snapshot.pid, pid);
        assert!(!snapshot.name.is_empty());
        assert!(snapshot.responding);
        assert!(snapshot.memory_bytes > 0);
        assert!(snapshot.start_time <= SystemTime::now());
    }

    #[test]
    fn test_list_contains_current_process() {
        let inspector = UnixProcessInspector::new();
        let pid = inspector.current_pid().unwrap();
        let all = inspector.list().unwrap();
        assert!(all.iter().any(|s| s.pid == pid));
    }

    #[test]
    fn test_snapshot_of_missing_process() {
        let inspector = UnixProcessInspector::new();
        let err = inspector.snapshot(0x3fff_fff0).unwrap_err();
        assert!(matches!(err, ProcessError::ProcessNotFound(0x3fff_fff0)));
    }

    #[test]
    fn test_machine_name_is_not_empty() {
        assert!(!UnixProcessInspector::new().machine_name().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_priority_of_child_process() {
        let inspector = UnixProcessInspector::new();
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        // raising the nice value never needs privileges
        inspector.set_priority(pid, PriorityClass::Idle).unwrap();
        let priority = inspector.priority(pid);

        child.kill().unwrap();
        child.wait().unwrap();
        assert_eq!(priority.unwrap(), PriorityClass::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn test_priority_of_missing_process() {
        let inspector = UnixProcessInspector::new();
        let err = inspector.priority(0x3fff_fff0).unwrap_err();
        assert!(matches!(err, ProcessError::ProcessNotFound(0x3fff_fff0)));
    }
}
