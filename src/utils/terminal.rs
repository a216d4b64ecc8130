//! Raw-mode handling for the host terminal.

use crossterm::terminal;
use tracing::{debug, warn};

/// Puts the host terminal into raw mode for the lifetime of the guard.
///
/// Raw mode turns off line buffering, local echo and signal-generating
/// control characters so every keystroke travels to the shell as-is. The
/// saved attributes are restored exactly once when the guard drops, which
/// covers every exit path: normal shell exit, a relay error, or a panic
/// unwinding past the scope.
///
/// When the host side is not a terminal the guard degrades to a no-op with
/// a warning: the bridge still relays bytes, just without raw-mode
/// semantics. That is never a reason to abort.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn enable() -> Self {
        match terminal::enable_raw_mode() {
            Ok(()) => {
                debug!("host terminal switched to raw mode");
                Self { active: true }
            }
            Err(e) => {
                warn!("raw mode unavailable ({}); continuing without it", e);
                Self { active: false }
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = terminal::disable_raw_mode() {
                warn!("failed to restore terminal attributes: {}", e);
            }
        }
    }
}
