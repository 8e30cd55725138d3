//! Asynchronous child processes with incrementally collected output.
//!
//! [`ManagedProcess`] launches a program and drains its standard output and
//! standard error line by line into [`OutputCollector`]s, which consumers
//! iterate while the process is still running. [`Executable`] locates the
//! highest-versioned copy of a program before launching it.

pub mod debug_mode;
pub mod executable;
pub mod managed;
pub mod platform;
pub mod version;

pub use debug_mode::{enter_debug_mode, is_debug_mode, leave_debug_mode};
pub use executable::Executable;
pub use managed::{ExitHandlerId, ManagedProcess};
pub use platform::PlatformProcessFactory;
pub use version::{FileVersion, read_file_version};

// Re-export core functionality
pub use asyncproc_core::*;
