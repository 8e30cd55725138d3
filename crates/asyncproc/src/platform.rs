use asyncproc_core::{PlatformFactory, ProcessInspector, ProcessLauncher};
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessFactory;

impl PlatformFactory for PlatformProcessFactory {
    type Launcher = <asyncproc_unix::UnixPlatformFactory as PlatformFactory>::Launcher;
    type Inspector = <asyncproc_unix::UnixPlatformFactory as PlatformFactory>::Inspector;

    fn create_launcher() -> Self::Launcher {
        asyncproc_unix::UnixPlatformFactory::create_launcher()
    }

    fn create_inspector() -> Self::Inspector {
        asyncproc_unix::UnixPlatformFactory::create_inspector()
    }

    fn platform_name() -> &'static str {
        asyncproc_unix::UnixPlatformFactory::platform_name()
    }
}

/// Process-wide launcher and inspector shared by every managed process
pub(crate) struct Platform {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub inspector: Arc<dyn ProcessInspector>,
}

pub(crate) fn platform() -> &'static Platform {
    static PLATFORM: OnceLock<Platform> = OnceLock::new();
    PLATFORM.get_or_init(|| {
        info!(
            platform = PlatformProcessFactory::platform_name(),
            "Initializing process platform"
        );
        Platform {
            launcher: Arc::new(PlatformProcessFactory::create_launcher()),
            inspector: Arc::new(PlatformProcessFactory::create_inspector()),
        }
    })
}
