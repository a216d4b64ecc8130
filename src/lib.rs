//! pty-bridge - a byte transport between a terminal UI host and a shell.
//!
//! The host process spawns this bridge with its own stdin/stdout attached,
//! plus one extra control descriptor. The bridge allocates a PTY, runs the
//! user's shell on the slave side, and shuttles bytes between the host and
//! the PTY master until the shell exits:
//!
//! - Host input (descriptor 0) is relayed to the shell byte for byte.
//! - Shell output is relayed to host output (descriptor 1) byte for byte.
//! - Window-resize directives arriving on the control descriptor are applied
//!   to the PTY so the shell sees the host's real geometry.
//!
//! The bridge finally exits with the shell's own exit status, so the host can
//! treat it as the shell.
//!
//! Everything here depends on PTY and fork primitives, so the library is
//! Unix only; the binary fails fast with an error elsewhere.

#![cfg(unix)]

pub mod bridge;
pub mod shell;
pub mod utils;

// Re-export commonly used types
pub use bridge::{Bridge, CONTROL_FD};
pub use shell::ShellProcess;
