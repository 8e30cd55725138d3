//! Process-wide debug mode.
//!
//! Entering debug mode would grant the debug privilege on systems that have
//! one. Unix has no such privilege, so only the nesting depth is tracked.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

static DEPTH: AtomicUsize = AtomicUsize::new(0);

pub fn enter_debug_mode() {
    let depth = DEPTH.fetch_add(1, Ordering::AcqRel) + 1;
    debug!(depth = depth, "Entered debug mode");
}

/// Unpaired calls are ignored
pub fn leave_debug_mode() {
    let left = DEPTH.fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
        depth.checked_sub(1)
    });
    match left {
        Ok(previous) => debug!(depth = previous - 1, "Left debug mode"),
        Err(_) => warn!("leave_debug_mode called without matching enter_debug_mode"),
    }
}

pub fn is_debug_mode() -> bool {
    DEPTH.load(Ordering::Acquire) > 0
}
