use crate::config::StartInfo;
use crate::error::ProcessError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncRead;

/// Unique identifier for a process
pub type ProcessId = u32;

/// Readable end of a captured child stream
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle of a managed process as seen by its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Process is currently running
    Running,
    /// Process has exited; output may still be draining
    Exited,
    /// The handle was released by its owner
    Closed,
}

/// How and when a process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRecord {
    /// Exit code; `128 + signal` for signal-terminated children, `None` when
    /// the process is not a child of this one
    pub code: Option<i32>,
    /// Signal that terminated the process, if any
    pub signal: Option<i32>,
    pub exit_time: SystemTime,
}

impl ExitRecord {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
            exit_time: SystemTime::now(),
        }
    }

    /// Exit observed without any status information
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
            exit_time: SystemTime::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Scheduling priority, mapped onto Unix nice values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityClass {
    Idle,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    RealTime,
}

impl PriorityClass {
    const ALL: [PriorityClass; 6] = [
        PriorityClass::Idle,
        PriorityClass::BelowNormal,
        PriorityClass::Normal,
        PriorityClass::AboveNormal,
        PriorityClass::High,
        PriorityClass::RealTime,
    ];

    pub fn nice(self) -> i32 {
        match self {
            PriorityClass::Idle => 19,
            PriorityClass::BelowNormal => 10,
            PriorityClass::Normal => 0,
            PriorityClass::AboveNormal => -5,
            PriorityClass::High => -11,
            PriorityClass::RealTime => -19,
        }
    }

    /// The class whose nice value is closest to `nice`
    pub fn from_nice(nice: i32) -> Self {
        Self::ALL
            .into_iter()
            .min_by_key(|class| (class.nice() - nice).abs())
            .unwrap_or(PriorityClass::Normal)
    }
}

/// Point-in-time view of a process as reported by the operating system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub name: String,
    pub executable: Option<PathBuf>,
    pub command_line: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub status: String,
    /// False for stopped, zombie and dead processes
    pub responding: bool,
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub cpu_usage: f32,
    pub start_time: SystemTime,
    pub run_time: Duration,
    pub threads: Vec<ProcessId>,
    pub handle_count: Option<usize>,
    pub session_id: Option<ProcessId>,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,
}

/// Handle to an operating-system process
#[async_trait]
pub trait NativeProcess: Send + Sync {
    fn pid(&self) -> ProcessId;

    /// Wait until the process has exited. Must be cancel safe.
    async fn wait(&mut self) -> Result<ExitRecord, ProcessError>;

    /// Request immediate termination without waiting for it
    fn start_kill(&mut self) -> Result<(), ProcessError>;
}

/// A freshly spawned child together with its captured streams
pub struct SpawnedProcess {
    pub native: Box<dyn NativeProcess>,
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
    pub start_time: SystemTime,
}

impl SpawnedProcess {
    pub fn pid(&self) -> ProcessId {
        self.native.pid()
    }
}

/// Creates processes and attaches to existing ones
pub trait ProcessLauncher: Send + Sync {
    /// Spawn `info.program` with stdout and stderr piped and stdin closed
    fn spawn(&self, info: &StartInfo) -> Result<SpawnedProcess, ProcessError>;

    /// Wrap an existing process that is not a child of this one
    fn attach(&self, pid: ProcessId) -> Result<Box<dyn NativeProcess>, ProcessError>;
}

/// Read-through access to process properties
pub trait ProcessInspector: Send + Sync {
    fn snapshot(&self, pid: ProcessId) -> Result<ProcessSnapshot, ProcessError>;

    fn list(&self) -> Result<Vec<ProcessSnapshot>, ProcessError>;

    fn current_pid(&self) -> Result<ProcessId, ProcessError>;

    /// Host name of the local machine
    fn machine_name(&self) -> String;

    fn priority(&self, pid: ProcessId) -> Result<PriorityClass, ProcessError>;

    fn set_priority(&self, pid: ProcessId, priority: PriorityClass) -> Result<(), ProcessError>;

    /// Ask the main window of `pid` to close; `false` when it has none
    fn close_main_window(&self, _pid: ProcessId) -> Result<bool, ProcessError> {
        Ok(false)
    }

    /// Wait until the message loop of `pid` is idle
    fn wait_for_input_idle(
        &self,
        _pid: ProcessId,
        _timeout: Option<Duration>,
    ) -> Result<bool, ProcessError> {
        Err(ProcessError::unsupported("waiting for input idle"))
    }
}

/// Factory trait for creating platform-specific process primitives
pub trait PlatformFactory {
    type Launcher: ProcessLauncher + 'static;
    type Inspector: ProcessInspector + 'static;

    fn create_launcher() -> Self::Launcher;

    fn create_inspector() -> Self::Inspector;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
