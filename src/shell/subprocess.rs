//! Shell subprocess lifecycle: PTY allocation, spawn, and reaping.
//!
//! The shell runs attached to a freshly allocated PTY. The spawn primitive
//! makes the child a session leader with the slave side as its controlling
//! terminal and its standard streams bound to it; the parent drops the slave
//! immediately and keeps only the master for the session's lifetime.

use std::os::fd::RawFd;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, info};

use crate::bridge::resize::{WindowResize, WindowSize};

/// Picks the shell to run from `$SHELL`, with a per-platform fallback.
pub fn shell_program() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| {
        if cfg!(target_os = "macos") || cfg!(target_os = "linux") {
            "/bin/zsh".to_string()
        } else {
            "/bin/bash".to_string()
        }
    })
}

/// Probe the host terminal for the initial PTY geometry.
///
/// Falls back to 80x24 when the host side is not a terminal; the control
/// channel corrects the size as soon as the host sends a directive.
pub fn host_pty_size() -> PtySize {
    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    PtySize { rows, cols, pixel_width: 0, pixel_height: 0 }
}

/// A shell running on the slave side of a PTY owned by this process.
pub struct ShellProcess {
    master: Box<dyn MasterPty + Send>,
    // Held so the spawn handle stays alive for the session; reaping goes
    // through waitpid on `pid`, exactly once.
    _child: Box<dyn Child + Send + Sync>,
    pid: Pid,
}

impl ShellProcess {
    /// Allocate a PTY pair and spawn `shell` on its slave side.
    ///
    /// Allocation and spawn failures are startup errors and propagate; there
    /// is nothing to degrade to without a shell.
    pub fn spawn(shell: &str, size: PtySize) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size)
            .context("failed to allocate a pty pair")?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");
        // Inherit current working directory
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("failed to spawn shell {}", shell))?;

        // The parent never reads or writes the slave side.
        drop(pair.slave);

        let pid = child
            .process_id()
            .map(|id| Pid::from_raw(id as i32))
            .context("spawned shell has no process id")?;

        info!("spawned {} (pid {}) on a {}x{} pty", shell, pid, size.rows, size.cols);

        Ok(Self { master: pair.master, _child: child, pid })
    }

    /// The master descriptor, for readiness registration and relay I/O.
    ///
    /// This borrows the one live master handle; it is never duplicated.
    pub fn master_fd(&self) -> Result<RawFd> {
        self.master
            .as_raw_fd()
            .context("pty master exposes no file descriptor")
    }

    /// Wait for the shell to terminate and translate its status into this
    /// process's exit code. Consumes the session: a child may only be
    /// reaped once.
    pub fn reap(self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(code) = exit_code_from(status) {
                        debug!("shell exited with status {}", code);
                        return Ok(code);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("waitpid on the shell failed"),
            }
        }
    }
}

impl WindowResize for ShellProcess {
    fn set_window_size(&self, size: WindowSize) -> Result<()> {
        self.master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("pty resize failed")
    }
}

/// Translate a wait status into a process exit code: the child's own code
/// for a normal exit, `128 + signal` (the shell convention) when a signal
/// killed it. Returns `None` for stop/continue states that are not
/// terminations.
fn exit_code_from(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}
