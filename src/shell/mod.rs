//! Shell process management.
//!
//! This module covers the shell's whole lifetime: picking the program from
//! the environment, spawning it on a fresh PTY, and reaping its exit status
//! once the relay loop is done.

mod subprocess;

pub use subprocess::{ShellProcess, host_pty_size, shell_program};
