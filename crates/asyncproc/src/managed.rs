use crate::debug_mode;
use crate::platform::{Platform, platform};
use asyncproc_core::{
    ExitRecord, NativeProcess, OutputCollector, OutputStream, PriorityClass, ProcessError,
    ProcessId, ProcessInspector, ProcessSnapshot, ProcessState, SpawnedProcess, StartInfo,
    StateError, pump_lines,
};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type ExitHandler = Arc<dyn Fn(&ExitRecord) + Send + Sync>;

type Reader = (&'static str, JoinHandle<Result<usize, ProcessError>>);

/// Identifies a handler registered with [`ManagedProcess::on_exit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitHandlerId(u64);

enum Control {
    Kill,
}

#[derive(Clone, Default)]
struct Lifecycle {
    /// Set as soon as the native process has been reaped
    exit: Option<ExitRecord>,
    /// Set once both output streams have drained and the collectors completed
    finished: bool,
}

#[derive(Default)]
struct ExitHandlers {
    next_id: u64,
    entries: Vec<(ExitHandlerId, ExitHandler)>,
    fired: bool,
}

struct Shared {
    lifecycle: watch::Sender<Lifecycle>,
    faults: Mutex<Vec<String>>,
    handlers: Mutex<ExitHandlers>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The runtime that will drive the reader and supervisor tasks
fn runtime() -> Result<Handle, ProcessError> {
    Handle::try_current()
        .map_err(|_| ProcessError::unsupported("managing processes requires a tokio runtime"))
}

impl Shared {
    fn new() -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::default());
        Self {
            lifecycle,
            faults: Mutex::new(Vec::new()),
            handlers: Mutex::new(ExitHandlers::default()),
        }
    }

    fn record_fault(&self, pid: ProcessId, fault: String) {
        warn!(pid = pid, fault = %fault, "Managed process fault");
        lock(&self.faults).push(fault);
    }

    fn notify_exit(&self, pid: ProcessId, record: &ExitRecord) {
        let handlers: Vec<ExitHandler> = {
            let mut handlers = lock(&self.handlers);
            handlers.fired = true;
            handlers.entries.drain(..).map(|(_, handler)| handler).collect()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(record))).is_err() {
                error!(pid = pid, "Exit handler panicked");
                self.record_fault(pid, "exit handler panicked".to_string());
            }
        }
    }
}

/// A child process whose output is collected asynchronously.
///
/// Standard output and standard error are decoded into lines by background
/// readers and appended to two [`OutputCollector`]s that any number of
/// consumers can iterate while the process runs. When the process exits its
/// exit record becomes readable first; the collectors are completed only after
/// both streams reached end of file, so a consumer that has seen the end of
/// the output can always read the exit code.
///
/// Dropping a `ManagedProcess` does not kill the child.
pub struct ManagedProcess {
    pid: ProcessId,
    start_time: SystemTime,
    stdout: OutputCollector<String>,
    stderr: OutputCollector<String>,
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
    inspector: Arc<dyn ProcessInspector>,
    cache: Mutex<Option<ProcessSnapshot>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

impl ManagedProcess {
    /// Launch `info.program` and start collecting its output.
    ///
    /// Fails with [`ProcessError::Unsupported`] outside a tokio runtime,
    /// before anything is spawned.
    pub fn start(info: StartInfo) -> Result<Self, ProcessError> {
        let runtime = runtime()?;
        let platform = platform();
        let spawned = platform.launcher.spawn(&info)?;
        Ok(Self::wire(&runtime, spawned, platform.inspector.clone()))
    }

    pub fn start_program(program: impl Into<PathBuf>) -> Result<Self, ProcessError> {
        Self::start(StartInfo::new(program))
    }

    pub fn start_with_args(
        program: impl Into<PathBuf>,
        arguments: impl Into<String>,
    ) -> Result<Self, ProcessError> {
        let mut info = StartInfo::new(program);
        info.arguments = Some(arguments.into());
        Self::start(info)
    }

    pub fn start_with_env(
        program: impl Into<PathBuf>,
        arguments: Option<&str>,
        env: HashMap<String, String>,
    ) -> Result<Self, ProcessError> {
        let mut info = StartInfo::new(program);
        info.arguments = arguments.map(str::to_string);
        info.env = env;
        Self::start(info)
    }

    /// Wire an already spawned process into a managed handle
    pub fn from_spawned(
        spawned: SpawnedProcess,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Result<Self, ProcessError> {
        let runtime = runtime()?;
        Ok(Self::wire(&runtime, spawned, inspector))
    }

    fn wire(
        runtime: &Handle,
        spawned: SpawnedProcess,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Self {
        let SpawnedProcess {
            native,
            stdout,
            stderr,
            start_time,
        } = spawned;
        let pid = native.pid();

        let out = OutputCollector::new();
        let err = OutputCollector::new();
        let mut readers = Vec::new();
        for (name, stream, sink) in [("stdout", stdout, &out), ("stderr", stderr, &err)] {
            if let Some(stream) = stream {
                readers.push(spawn_reader(runtime, pid, name, stream, sink.clone()));
            }
        }

        Self::supervise(runtime, pid, start_time, native, readers, out, err, inspector)
    }

    /// Wrap a process this one did not spawn; it has no captured output
    fn attached(
        platform: &Platform,
        snapshot: ProcessSnapshot,
    ) -> Result<Self, ProcessError> {
        let runtime = runtime()?;
        let native = platform.launcher.attach(snapshot.pid)?;
        let out = OutputCollector::new();
        let err = OutputCollector::new();
        out.complete();
        err.complete();

        let process = Self::supervise(
            &runtime,
            snapshot.pid,
            snapshot.start_time,
            native,
            Vec::new(),
            out,
            err,
            platform.inspector.clone(),
        );
        *lock(&process.cache) = Some(snapshot);
        Ok(process)
    }

    #[allow(clippy::too_many_arguments)]
    fn supervise(
        runtime: &Handle,
        pid: ProcessId,
        start_time: SystemTime,
        native: Box<dyn NativeProcess>,
        readers: Vec<Reader>,
        stdout: OutputCollector<String>,
        stderr: OutputCollector<String>,
        inspector: Arc<dyn ProcessInspector>,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let (control, control_rx) = mpsc::unbounded_channel();

        runtime.spawn(supervise_process(
            native,
            control_rx,
            readers,
            stdout.clone(),
            stderr.clone(),
            shared.clone(),
        ));

        Self {
            pid,
            start_time,
            stdout,
            stderr,
            shared,
            control,
            inspector,
            cache: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), ProcessError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StateError::Closed.into())
        } else {
            Ok(())
        }
    }

    fn recorded_exit(&self) -> Option<ExitRecord> {
        self.shared.lifecycle.borrow().exit.clone()
    }

    pub fn standard_output(&self) -> &OutputCollector<String> {
        &self.stdout
    }

    pub fn standard_error(&self) -> &OutputCollector<String> {
        &self.stderr
    }

    pub fn state(&self) -> ProcessState {
        if self.closed.load(Ordering::Acquire) {
            ProcessState::Closed
        } else if self.recorded_exit().is_some() {
            ProcessState::Exited
        } else {
            ProcessState::Running
        }
    }

    pub fn id(&self) -> Result<ProcessId, ProcessError> {
        self.ensure_open()?;
        Ok(self.pid)
    }

    pub fn has_exited(&self) -> Result<bool, ProcessError> {
        self.ensure_open()?;
        Ok(self.recorded_exit().is_some())
    }

    /// The full exit record, available once the process has exited
    pub fn exit_status(&self) -> Result<ExitRecord, ProcessError> {
        self.ensure_open()?;
        self.recorded_exit()
            .ok_or_else(|| StateError::NotExited.into())
    }

    pub fn exit_code(&self) -> Result<i32, ProcessError> {
        self.exit_status()?
            .code
            .ok_or_else(|| StateError::NoExitCode.into())
    }

    pub fn exit_time(&self) -> Result<SystemTime, ProcessError> {
        Ok(self.exit_status()?.exit_time)
    }

    pub fn start_time(&self) -> Result<SystemTime, ProcessError> {
        self.ensure_open()?;
        Ok(self.start_time)
    }

    /// Failures recorded by the background readers and exit handlers
    pub fn faults(&self) -> Vec<String> {
        lock(&self.shared.faults).clone()
    }

    /// Request immediate termination.
    ///
    /// Returns without waiting; the exit is observed through
    /// [`ManagedProcess::wait_for_exit`] and the collectors as usual.
    pub fn kill(&self) -> Result<(), ProcessError> {
        self.ensure_open()?;
        if self.recorded_exit().is_some() {
            return Err(StateError::NotRunning.into());
        }

        self.control
            .send(Control::Kill)
            .map_err(|_| ProcessError::from(StateError::NotRunning))?;
        info!(pid = self.pid, "Kill requested");
        Ok(())
    }

    /// Wait until the process has exited and its output has been drained.
    ///
    /// Returns `false` when `timeout` elapses first; `None` waits forever.
    /// A process whose descendants still hold its stdout or stderr open is not
    /// finished yet, even though [`ManagedProcess::has_exited`] and
    /// [`ManagedProcess::exit_code`] already report its exit.
    pub async fn wait_for_exit(&self, timeout: Option<Duration>) -> Result<bool, ProcessError> {
        self.ensure_open()?;
        let mut lifecycle = self.shared.lifecycle.subscribe();
        let finished = async move {
            lifecycle
                .wait_for(|state| state.finished)
                .await
                .map(|_| ())
                .map_err(|_| ProcessError::Other(anyhow::anyhow!("process supervisor vanished")))
        };

        match timeout {
            None => finished.await.map(|_| true),
            Some(duration) => match tokio::time::timeout(duration, finished).await {
                Ok(result) => result.map(|_| true),
                Err(_) => Ok(false),
            },
        }
    }

    pub fn wait_for_input_idle(&self, timeout: Option<Duration>) -> Result<bool, ProcessError> {
        self.ensure_open()?;
        self.inspector.wait_for_input_idle(self.pid, timeout)
    }

    /// Cached operating-system view of the process, read on first access
    pub fn info(&self) -> Result<ProcessSnapshot, ProcessError> {
        self.ensure_open()?;
        let mut cache = lock(&self.cache);
        if let Some(snapshot) = cache.as_ref() {
            return Ok(snapshot.clone());
        }

        let snapshot = self.inspector.snapshot(self.pid)?;
        *cache = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Discard the cached view so the next access reads fresh data
    pub fn refresh(&self) -> Result<(), ProcessError> {
        self.ensure_open()?;
        lock(&self.cache).take();
        Ok(())
    }

    pub fn process_name(&self) -> Result<String, ProcessError> {
        Ok(self.info()?.name)
    }

    pub fn threads(&self) -> Result<Vec<ProcessId>, ProcessError> {
        Ok(self.info()?.threads)
    }

    pub fn handle_count(&self) -> Result<Option<usize>, ProcessError> {
        Ok(self.info()?.handle_count)
    }

    pub fn responding(&self) -> Result<bool, ProcessError> {
        Ok(self.info()?.responding)
    }

    pub fn machine_name(&self) -> Result<String, ProcessError> {
        self.ensure_open()?;
        Ok(self.inspector.machine_name())
    }

    pub fn priority_class(&self) -> Result<PriorityClass, ProcessError> {
        self.ensure_open()?;
        self.inspector.priority(self.pid)
    }

    pub fn set_priority_class(&self, priority: PriorityClass) -> Result<(), ProcessError> {
        self.ensure_open()?;
        if self.recorded_exit().is_some() {
            return Err(StateError::NotRunning.into());
        }
        self.inspector.set_priority(self.pid, priority)
    }

    pub fn close_main_window(&self) -> Result<bool, ProcessError> {
        self.ensure_open()?;
        self.inspector.close_main_window(self.pid)
    }

    /// Release the handle. Further property access fails with
    /// [`StateError::Closed`]; collected output stays readable.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            lock(&self.cache).take();
            info!(pid = self.pid, "Closed process handle");
        }
    }

    /// Register `handler` to run once after the process exited and its
    /// output was collected. Handlers registered after that point never run.
    pub fn on_exit<F>(&self, handler: F) -> ExitHandlerId
    where
        F: Fn(&ExitRecord) + Send + Sync + 'static,
    {
        let mut handlers = lock(&self.shared.handlers);
        let id = ExitHandlerId(handlers.next_id);
        handlers.next_id += 1;
        if handlers.fired {
            debug!(pid = self.pid, "Exit handler registered after exit, ignoring");
        } else {
            let handler: ExitHandler = Arc::new(handler);
            handlers.entries.push((id, handler));
        }
        id
    }

    pub fn remove_exit_handler(&self, id: ExitHandlerId) -> bool {
        let mut handlers = lock(&self.shared.handlers);
        let before = handlers.entries.len();
        handlers.entries.retain(|(entry, _)| *entry != id);
        handlers.entries.len() != before
    }

    pub fn get_processes() -> Result<Vec<ManagedProcess>, ProcessError> {
        Self::get_processes_on(".")
    }

    pub fn get_processes_on(machine_name: &str) -> Result<Vec<ManagedProcess>, ProcessError> {
        runtime()?;
        let platform = platform();
        ensure_local(platform, machine_name)?;
        wrap_all(platform, platform.inspector.list()?)
    }

    pub fn get_processes_by_name(name: &str) -> Result<Vec<ManagedProcess>, ProcessError> {
        Self::get_processes_by_name_on(name, ".")
    }

    pub fn get_processes_by_name_on(
        name: &str,
        machine_name: &str,
    ) -> Result<Vec<ManagedProcess>, ProcessError> {
        runtime()?;
        let platform = platform();
        ensure_local(platform, machine_name)?;
        let matching = platform
            .inspector
            .list()?
            .into_iter()
            .filter(|snapshot| snapshot.name == name)
            .collect();
        wrap_all(platform, matching)
    }

    pub fn get_process_by_id(pid: ProcessId) -> Result<ManagedProcess, ProcessError> {
        Self::get_process_by_id_on(pid, ".")
    }

    pub fn get_process_by_id_on(
        pid: ProcessId,
        machine_name: &str,
    ) -> Result<ManagedProcess, ProcessError> {
        let platform = platform();
        ensure_local(platform, machine_name)?;
        let snapshot = platform.inspector.snapshot(pid)?;
        Self::attached(platform, snapshot)
    }

    pub fn get_current_process() -> Result<ManagedProcess, ProcessError> {
        let pid = platform().inspector.current_pid()?;
        Self::get_process_by_id(pid)
    }

    pub fn enter_debug_mode() {
        debug_mode::enter_debug_mode();
    }

    pub fn leave_debug_mode() {
        debug_mode::leave_debug_mode();
    }

    pub fn is_debug_mode() -> bool {
        debug_mode::is_debug_mode()
    }
}

fn ensure_local(platform: &Platform, machine_name: &str) -> Result<(), ProcessError> {
    let local = matches!(machine_name, "" | ".")
        || machine_name.eq_ignore_ascii_case("localhost")
        || machine_name.eq_ignore_ascii_case(&platform.inspector.machine_name());
    if local {
        Ok(())
    } else {
        Err(ProcessError::unsupported(format!(
            "process access on remote machine '{machine_name}'"
        )))
    }
}

fn wrap_all(
    platform: &Platform,
    snapshots: Vec<ProcessSnapshot>,
) -> Result<Vec<ManagedProcess>, ProcessError> {
    let mut processes = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        let pid = snapshot.pid;
        match ManagedProcess::attached(platform, snapshot) {
            Ok(process) => processes.push(process),
            // exited between enumeration and attach
            Err(ProcessError::ProcessNotFound(_)) => debug!(pid = pid, "Process vanished"),
            Err(e) => return Err(e),
        }
    }
    Ok(processes)
}

fn spawn_reader(
    runtime: &Handle,
    pid: ProcessId,
    stream: &'static str,
    io: OutputStream,
    sink: OutputCollector<String>,
) -> Reader {
    let handle = runtime.spawn(async move {
        let lines = pump_lines(io, &sink).await?;
        debug!(pid = pid, stream = stream, lines = lines, "Output stream reached end of file");
        Ok::<_, ProcessError>(lines)
    });
    (stream, handle)
}

async fn supervise_process(
    mut native: Box<dyn NativeProcess>,
    mut control: mpsc::UnboundedReceiver<Control>,
    readers: Vec<Reader>,
    stdout: OutputCollector<String>,
    stderr: OutputCollector<String>,
    shared: Arc<Shared>,
) {
    let pid = native.pid();
    let mut owner_attached = true;

    let status = loop {
        tokio::select! {
            status = native.wait() => break status,
            command = control.recv(), if owner_attached => match command {
                Some(Control::Kill) => {
                    if let Err(e) = native.start_kill() {
                        shared.record_fault(pid, format!("kill failed: {e}"));
                    }
                }
                None => {
                    owner_attached = false;
                    if readers.is_empty() {
                        debug!(pid = pid, "Process handle dropped, stopping supervision");
                        return;
                    }
                }
            },
        }
    };

    let record = status.unwrap_or_else(|e| {
        shared.record_fault(pid, format!("wait failed: {e}"));
        ExitRecord::unknown()
    });
    info!(pid = pid, code = ?record.code, signal = ?record.signal, "Process exited");
    shared
        .lifecycle
        .send_modify(|lifecycle| lifecycle.exit = Some(record.clone()));

    // Every line the child wrote must be collected before completion
    for (stream, reader) in readers {
        match reader.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => shared.record_fault(pid, format!("{stream} reader failed: {e}")),
            Err(e) => shared.record_fault(pid, format!("{stream} reader aborted: {e}")),
        }
    }

    stdout.complete();
    stderr.complete();
    shared
        .lifecycle
        .send_modify(|lifecycle| lifecycle.finished = true);
    shared.notify_exit(pid, &record);
}
