//! Main entry point for the pty-bridge binary.
//!
//! Spawns the shell on a fresh PTY, switches the host terminal to raw mode,
//! runs the relay loop until the shell exits, and exits with the shell's own
//! status code.

use anyhow::Result;

#[cfg(unix)]
fn main() -> Result<()> {
    // Initialize logging before anything else; diagnostics go to a file so
    // the host byte streams stay untouched.
    let log_guard = pty_bridge::utils::logger::init_logging();

    let code = run()?;

    // Flush pending log lines before the hard exit below skips destructors.
    drop(log_guard);
    std::process::exit(code);
}

#[cfg(unix)]
fn run() -> Result<i32> {
    use std::io::{stdin, stdout};
    use std::os::fd::AsRawFd;

    use pty_bridge::bridge::{Bridge, CONTROL_FD};
    use pty_bridge::shell::{self, ShellProcess};
    use pty_bridge::utils::terminal::RawModeGuard;

    let shell = shell::shell_program();
    let session = ShellProcess::spawn(&shell, shell::host_pty_size())?;

    {
        // Raw mode lives exactly as long as the relay loop. The guard
        // restores the saved attributes when this scope unwinds, whether the
        // loop finished normally or bailed with an error.
        let _raw = RawModeGuard::enable();

        let mut bridge = Bridge::new(
            session.master_fd()?,
            stdin().as_raw_fd(),
            stdout().as_raw_fd(),
            Some(CONTROL_FD),
            &session,
        );
        bridge.run()?;
    }

    session.reap()
}

#[cfg(not(unix))]
fn main() -> Result<()> {
    anyhow::bail!("pty-bridge requires pty and fork support; this platform has neither");
}
