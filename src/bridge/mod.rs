//! The relay loop between the PTY master and the host byte streams.
//!
//! A bridge session registers three readable sources - shell output on the
//! PTY master, host input on descriptor 0, and resize directives on the
//! control descriptor - then blocks in `poll(2)` until one of them is ready
//! and reacts with a bounded chunked read followed by a full write. There is
//! exactly one thread of control: every reaction runs to completion before
//! the next readiness check, so no locking is needed anywhere.
//!
//! End-of-stream on the PTY master is the one condition that ends the loop;
//! it means the shell has exited. End-of-stream on host input or the control
//! channel only removes that source and the session keeps going.

pub mod resize;

use std::os::fd::{BorrowedFd, RawFd};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd;
use tracing::{debug, warn};

use self::resize::WindowResize;

/// Well-known descriptor on which the host delivers resize directives.
pub const CONTROL_FD: RawFd = 3;

/// Upper bound on a single chunked read from any source.
const CHUNK_SIZE: usize = 1024;

/// The byte sources the loop reacts to, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Shell output on the PTY master, relayed to host output.
    PtyOutput,
    /// Host keystrokes on descriptor 0, relayed to the PTY master.
    HostInput,
    /// Resize directives on the control channel.
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// All registered sources are serviced.
    Running,
    /// The shell side reached end-of-stream; the loop is done.
    Draining,
}

/// One readiness registration: a source and the descriptor it reads from.
struct Registration {
    source: Source,
    fd: RawFd,
}

/// A single bridge session.
///
/// Owns the registration set and the running/draining flag so that several
/// simulated sessions can coexist in one test process. The PTY master is
/// borrowed by descriptor - the session never duplicates it.
pub struct Bridge<'a> {
    registrations: Vec<Registration>,
    pty_fd: RawFd,
    host_in: RawFd,
    host_out: RawFd,
    control: Option<RawFd>,
    pty: &'a dyn WindowResize,
    state: State,
}

impl<'a> Bridge<'a> {
    /// Build a session over the given descriptors.
    ///
    /// `control` may be `None` when the host did not open a resize channel;
    /// the bridge then runs as a plain two-way relay.
    pub fn new(
        pty_fd: RawFd,
        host_in: RawFd,
        host_out: RawFd,
        control: Option<RawFd>,
        pty: &'a dyn WindowResize,
    ) -> Self {
        let mut registrations = vec![
            Registration { source: Source::PtyOutput, fd: pty_fd },
            Registration { source: Source::HostInput, fd: host_in },
        ];
        if let Some(fd) = control {
            registrations.push(Registration { source: Source::Control, fd });
        }

        Self {
            registrations,
            pty_fd,
            host_in,
            host_out,
            control,
            pty,
            state: State::Running,
        }
    }

    /// Run the relay until the shell side reaches end-of-stream.
    ///
    /// Only a failure of the readiness wait itself is an error; everything
    /// the sources do (EOF, hangup, write rejection) is absorbed as a state
    /// change per the rules above.
    pub fn run(&mut self) -> Result<()> {
        while self.state == State::Running {
            let ready = self.wait_ready()?;
            // A ready batch is dispatched to completion even if an early
            // reaction flips the session to draining.
            for (source, revents) in ready {
                self.dispatch(source, revents);
            }
        }
        debug!("bridge session finished");
        Ok(())
    }

    /// Block until at least one registered descriptor is readable and return
    /// the ready sources in registration order.
    fn wait_ready(&self) -> Result<Vec<(Source, PollFlags)>> {
        let mut poll_fds: Vec<PollFd> = self
            .registrations
            .iter()
            .map(|r| PollFd::new(borrow_fd(r.fd), PollFlags::POLLIN))
            .collect();

        loop {
            match poll(&mut poll_fds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("poll on bridge descriptors failed"),
            }
        }

        let interesting = PollFlags::POLLIN
            | PollFlags::POLLHUP
            | PollFlags::POLLERR
            | PollFlags::POLLNVAL;

        Ok(self
            .registrations
            .iter()
            .zip(poll_fds.iter())
            .filter_map(|(r, pfd)| {
                let revents = pfd.revents().unwrap_or(PollFlags::empty());
                revents.intersects(interesting).then_some((r.source, revents))
            })
            .collect())
    }

    fn dispatch(&mut self, source: Source, revents: PollFlags) {
        if revents.contains(PollFlags::POLLNVAL) {
            // The host never opened this descriptor (or closed it under us);
            // treat that as end-of-stream for the source.
            warn!("descriptor for {:?} is not open; dropping the source", source);
            self.end_source(source);
            return;
        }
        match source {
            Source::PtyOutput => self.on_pty_output(),
            Source::HostInput => self.on_host_input(),
            Source::Control => self.on_control(),
        }
    }

    /// Shell output: relay one chunk to host output. End-of-stream or a read
    /// error here means the shell exited and the session drains.
    fn on_pty_output(&mut self) {
        let mut buf = [0u8; CHUNK_SIZE];
        match read_chunk(self.pty_fd, &mut buf) {
            Ok(0) | Err(_) => self.begin_drain(),
            Ok(n) => {
                if let Err(e) = write_all(self.host_out, &buf[..n]) {
                    warn!("host output rejected {} bytes: {}", n, e);
                    self.begin_drain();
                }
            }
        }
    }

    /// Host input: relay one chunk to the shell. End-of-stream removes this
    /// source only; the shell session continues without further input.
    fn on_host_input(&mut self) {
        let mut buf = [0u8; CHUNK_SIZE];
        match read_chunk(self.host_in, &mut buf) {
            Ok(0) | Err(_) => self.end_source(Source::HostInput),
            Ok(n) => {
                if let Err(e) = write_all(self.pty_fd, &buf[..n]) {
                    warn!("pty rejected {} bytes of host input: {}", n, e);
                    self.end_source(Source::HostInput);
                }
            }
        }
    }

    /// Control channel: decode and apply resize directives. End-of-stream
    /// removes the channel; resizing is optional and the relay keeps going.
    fn on_control(&mut self) {
        let Some(fd) = self.control else { return };
        let mut buf = [0u8; CHUNK_SIZE];
        match read_chunk(fd, &mut buf) {
            Ok(0) | Err(_) => self.end_source(Source::Control),
            Ok(n) => resize::apply_directives(&buf[..n], self.pty),
        }
    }

    fn begin_drain(&mut self) {
        debug!("pty reached end of stream; the shell has exited");
        self.state = State::Draining;
        self.registrations.retain(|r| r.source != Source::PtyOutput);
    }

    fn end_source(&mut self, source: Source) {
        if source == Source::PtyOutput {
            self.begin_drain();
            return;
        }
        debug!("{:?} reached end of stream; deregistering", source);
        self.registrations.retain(|r| r.source != source);
        if source == Source::Control {
            self.control = None;
        }
    }
}

/// Borrow a raw descriptor for a poll registration or a read/write.
///
/// Callers only pass descriptors that stay open for the lifetime of the
/// session: the PTY master owned by the shell process, and the host-provided
/// streams.
fn borrow_fd<'fd>(fd: RawFd) -> BorrowedFd<'fd> {
    // SAFETY: see above - every registered descriptor outlives the loop.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// Read up to one chunk, retrying when interrupted by a signal.
fn read_chunk(fd: RawFd, buf: &mut [u8]) -> nix::Result<usize> {
    loop {
        match unistd::read(borrow_fd(fd), buf) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Write the whole buffer, retrying partial writes and interruptions.
/// A truncated relay write would corrupt the byte stream, so short writes
/// keep going until the chunk is flushed.
pub(crate) fn write_all(fd: RawFd, mut data: &[u8]) -> nix::Result<()> {
    while !data.is_empty() {
        match unistd::write(borrow_fd(fd), data) {
            Ok(0) => return Err(Errno::EIO),
            Ok(n) => data = &data[n..],
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::thread;

    use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
    use nix::unistd;

    use super::resize::{WindowResize, WindowSize};
    use super::*;

    /// Records applied sizes instead of touching a real PTY.
    #[derive(Default)]
    struct RecordingPty(RefCell<Vec<WindowSize>>);

    impl WindowResize for RecordingPty {
        fn set_window_size(&self, size: WindowSize) -> Result<()> {
            self.0.borrow_mut().push(size);
            Ok(())
        }
    }

    /// A bidirectional stand-in for the PTY master: reads return whatever
    /// the peer wrote, then end-of-stream once the peer end is dropped.
    fn fake_pty() -> (OwnedFd, OwnedFd) {
        socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty()).unwrap()
    }

    fn host_pipe() -> (OwnedFd, OwnedFd) {
        unistd::pipe().unwrap()
    }

    fn read_to_end(fd: &OwnedFd) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match unistd::read(fd, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
            }
        }
        out
    }

    #[test]
    fn relays_shell_output_to_host_byte_for_byte() {
        let (master, shell) = fake_pty();
        let (host_in_r, _host_in_w) = host_pipe();
        let (host_out_r, host_out_w) = host_pipe();

        // Several multiples of the chunk size, patterned so reordering or
        // duplication would show up in the comparison.
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        write_all(shell.as_raw_fd(), &payload).unwrap();
        drop(shell); // shell exits -> end-of-stream on the master

        let pty = RecordingPty::default();
        let mut bridge = Bridge::new(
            master.as_raw_fd(),
            host_in_r.as_raw_fd(),
            host_out_w.as_raw_fd(),
            None,
            &pty,
        );
        bridge.run().unwrap();

        drop(bridge);
        drop(host_out_w);
        assert_eq!(read_to_end(&host_out_r), payload);
    }

    #[test]
    fn relays_host_input_to_shell_across_chunks() {
        let (master, shell) = fake_pty();
        let (host_in_r, host_in_w) = host_pipe();
        let (_host_out_r, host_out_w) = host_pipe();

        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 13) as u8 + b'a').collect();
        write_all(host_in_w.as_raw_fd(), &payload).unwrap();
        drop(host_in_w);

        let want = payload.len();
        let reader = thread::spawn(move || {
            let mut seen = Vec::new();
            let mut buf = [0u8; 4096];
            while seen.len() < want {
                match unistd::read(&shell, &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
            // Closing the shell end unblocks the bridge with end-of-stream.
            drop(shell);
            seen
        });

        let pty = RecordingPty::default();
        let mut bridge = Bridge::new(
            master.as_raw_fd(),
            host_in_r.as_raw_fd(),
            host_out_w.as_raw_fd(),
            None,
            &pty,
        );
        bridge.run().unwrap();

        assert_eq!(reader.join().unwrap(), payload);
    }

    #[test]
    fn pty_end_of_stream_ends_the_loop_while_other_sources_stay_open() {
        let (master, shell) = fake_pty();
        let (host_in_r, _host_in_w) = host_pipe();
        let (_host_out_r, host_out_w) = host_pipe();
        let (control_r, _control_w) = host_pipe();

        drop(shell);

        let pty = RecordingPty::default();
        let mut bridge = Bridge::new(
            master.as_raw_fd(),
            host_in_r.as_raw_fd(),
            host_out_w.as_raw_fd(),
            Some(control_r.as_raw_fd()),
            &pty,
        );
        // Host input and control are still open; the loop must return anyway.
        bridge.run().unwrap();
    }

    #[test]
    fn host_input_end_of_stream_keeps_the_session_alive() {
        let (master, shell) = fake_pty();
        let (host_in_r, host_in_w) = host_pipe();
        let (host_out_r, host_out_w) = host_pipe();

        // Host hung up its input side before the session even started...
        drop(host_in_w);
        // ...but shell output must still reach the host.
        write_all(shell.as_raw_fd(), b"still here").unwrap();
        drop(shell);

        let pty = RecordingPty::default();
        let mut bridge = Bridge::new(
            master.as_raw_fd(),
            host_in_r.as_raw_fd(),
            host_out_w.as_raw_fd(),
            None,
            &pty,
        );
        bridge.run().unwrap();

        drop(bridge);
        drop(host_out_w);
        assert_eq!(read_to_end(&host_out_r), b"still here");
    }

    #[test]
    fn control_channel_resizes_the_pty() {
        let (master, shell) = fake_pty();
        let (host_in_r, _host_in_w) = host_pipe();
        let (_host_out_r, host_out_w) = host_pipe();
        let (control_r, control_w) = host_pipe();

        write_all(control_w.as_raw_fd(), b"24x80\nbogus\n7x9\n").unwrap();
        drop(control_w);
        drop(shell);

        let pty = RecordingPty::default();
        let mut bridge = Bridge::new(
            master.as_raw_fd(),
            host_in_r.as_raw_fd(),
            host_out_w.as_raw_fd(),
            Some(control_r.as_raw_fd()),
            &pty,
        );
        bridge.run().unwrap();

        assert_eq!(
            *pty.0.borrow(),
            vec![
                WindowSize { rows: 24, cols: 80 },
                WindowSize { rows: 7, cols: 9 },
            ]
        );
    }

    #[test]
    fn missing_control_descriptor_degrades_to_a_plain_relay() {
        let (master, shell) = fake_pty();
        let (host_in_r, _host_in_w) = host_pipe();
        let (host_out_r, host_out_w) = host_pipe();

        write_all(shell.as_raw_fd(), b"ok").unwrap();
        drop(shell);

        let pty = RecordingPty::default();
        // Descriptor 999 was never opened; poll reports it invalid and the
        // bridge must drop the control source rather than fail.
        let mut bridge = Bridge::new(
            master.as_raw_fd(),
            host_in_r.as_raw_fd(),
            host_out_w.as_raw_fd(),
            Some(999),
            &pty,
        );
        bridge.run().unwrap();

        drop(bridge);
        drop(host_out_w);
        assert_eq!(read_to_end(&host_out_r), b"ok");
        assert!(pty.0.borrow().is_empty());
    }
}
