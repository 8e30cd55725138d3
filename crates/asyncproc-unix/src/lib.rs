//! Unix process primitives: tokio child processes, nix signals, sysinfo
//! snapshots and rustix priorities.

mod unix_inspector;
mod unix_launcher;

pub use unix_inspector::UnixProcessInspector;
pub use unix_launcher::*;

use asyncproc_core::PlatformFactory;

pub struct UnixPlatformFactory;

impl PlatformFactory for UnixPlatformFactory {
    type Launcher = UnixProcessLauncher;
    type Inspector = UnixProcessInspector;

    fn create_launcher() -> UnixProcessLauncher {
        UnixProcessLauncher::new()
    }

    fn create_inspector() -> UnixProcessInspector {
        UnixProcessInspector::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
