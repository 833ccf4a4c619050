//! Pseudo-terminal process execution
//!
//! Runs a child with stdin, stdout and stderr each attached to the slave side of its own
//! pseudo-terminal, so the child sees three interactive terminals instead of pipes and keeps
//! its line-buffered behavior. The parent feeds the input through the stdin master and
//! multiplexes the stdout/stderr masters with `poll` until both close or the deadline expires.
//!
//! Every descriptor is owned by a guard, and the child by `ChildGuard`, so each of the six
//! pty descriptors is closed exactly once and the child is always reaped, whichever way
//! `run` returns.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use tracing::{debug, trace};

use super::{CaptureError, CaptureLimits, CommandSpec, StreamName};
use crate::core::Capture;

/// One pseudo-terminal: the parent keeps `master`, the child gets `slave`
struct PtyPair {
    master: File,
    slave: OwnedFd,
}

// Both sides are opened with O_CLOEXEC so a child forked by a concurrent capture never
// inherits them; dup2 onto 0/1/2 clears the flag for the child's own copies.
fn open_pair() -> Result<PtyPair, CaptureError> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
        .map_err(CaptureError::Pty)?;
    grantpt(&master).map_err(CaptureError::Pty)?;
    unlockpt(&master).map_err(CaptureError::Pty)?;
    let slave_path = ptsname_r(&master).map_err(CaptureError::Pty)?;

    // std opens every file with O_CLOEXEC
    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NOCTTY.bits())
        .open(&slave_path)
        .map_err(|source| CaptureError::PtySlave {
            path: slave_path.clone(),
            source,
        })?;

    // SAFETY: `into_raw_fd` hands over sole ownership of a valid, open descriptor
    let master = unsafe { File::from_raw_fd(master.into_raw_fd()) };
    Ok(PtyPair {
        master,
        slave: OwnedFd::from(slave),
    })
}

fn set_nonblocking(file: &File) -> Result<(), CaptureError> {
    let flags = fcntl(file.as_raw_fd(), FcntlArg::F_GETFL).map_err(CaptureError::Pty)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(CaptureError::Pty)?;
    Ok(())
}

/// Kills (if still running) and reaps the child when dropped
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Kill the child if it has not exited yet, then wait for it
    fn terminate(&mut self) -> io::Result<ExitStatus> {
        if self.child.try_wait()?.is_none() {
            debug!("Killing child pid={}", self.child.id());
            self.child.kill()?;
        }
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Output side of the capture loop
struct OutputStream {
    name: StreamName,
    master: File,
    buf: Vec<u8>,
    open: bool,
}

impl OutputStream {
    fn new(name: StreamName, master: File) -> Self {
        Self {
            name,
            master,
            buf: Vec::new(),
            open: true,
        }
    }

    /// Read one chunk. EIO is how Linux reports that every slave descriptor has been closed,
    /// so it ends the stream like a zero-length read does.
    fn read_chunk(&mut self, chunk: &mut [u8]) -> Result<(), CaptureError> {
        match self.master.read(chunk) {
            Ok(0) => self.open = false,
            Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => self.open = false,
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {}
            Err(source) => {
                return Err(CaptureError::Io {
                    stream: self.name,
                    source,
                })
            }
        }
        if !self.open {
            trace!("{} reached end of stream", self.name);
        }
        Ok(())
    }
}

/// Input side of the capture loop; whatever the terminal does not accept immediately is
/// retried when the master becomes writable again
struct InputStream {
    master: File,
    pending: Vec<u8>,
    written: usize,
}

impl InputStream {
    fn has_pending(&self) -> bool {
        self.written < self.pending.len()
    }

    fn flush(&mut self) -> Result<(), CaptureError> {
        while self.has_pending() {
            match self.master.write(&self.pending[self.written..]) {
                Ok(0) => break,
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // the child already closed its side; nobody will read the rest
                Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                    debug!(
                        "Child closed stdin with {} input bytes unread",
                        self.pending.len() - self.written
                    );
                    self.written = self.pending.len();
                }
                Err(source) => {
                    return Err(CaptureError::Io {
                        stream: StreamName::Stdin,
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Readiness reported by one `poll` round
#[derive(Default)]
struct Ready {
    stdout: bool,
    stderr: bool,
    stdin: bool,
}

const READABLE: PollFlags = PollFlags::POLLIN
    .union(PollFlags::POLLHUP)
    .union(PollFlags::POLLERR);

fn poll_timeout(remaining: Duration) -> PollTimeout {
    let ms = remaining.as_micros().div_ceil(1000).min(u16::MAX as u128) as u16;
    PollTimeout::from(ms)
}

fn wait_ready(
    stdout: &OutputStream,
    stderr: &OutputStream,
    stdin: &InputStream,
    remaining: Duration,
) -> Result<Ready, CaptureError> {
    let mut slots = Vec::with_capacity(3);
    let mut fds = Vec::with_capacity(3);
    for stream in [stdout, stderr] {
        if stream.open {
            slots.push(stream.name);
            fds.push(PollFd::new(stream.master.as_fd(), PollFlags::POLLIN));
        }
    }
    if stdin.has_pending() {
        slots.push(StreamName::Stdin);
        fds.push(PollFd::new(stdin.master.as_fd(), PollFlags::POLLOUT));
    }

    match poll(&mut fds, poll_timeout(remaining)) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(Ready::default()),
        Err(e) => return Err(CaptureError::Poll(e)),
    }

    let mut ready = Ready::default();
    for (slot, fd) in slots.into_iter().zip(fds.iter()) {
        let revents = fd.revents().unwrap_or(PollFlags::empty());
        if revents.contains(PollFlags::POLLNVAL) {
            return Err(CaptureError::InvalidDescriptor { stream: slot });
        }
        match slot {
            StreamName::Stdout => ready.stdout = revents.intersects(READABLE),
            StreamName::Stderr => ready.stderr = revents.intersects(READABLE),
            StreamName::Stdin => {
                ready.stdin = revents.intersects(PollFlags::POLLOUT | PollFlags::POLLHUP)
            }
        }
    }
    Ok(ready)
}

fn spawn(
    cmd: &CommandSpec,
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
) -> Result<Child, CaptureError> {
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    // `command` owns the slave descriptors and closes them when it goes out of scope,
    // so the parent holds no slave side once this returns
    command.spawn().map_err(|source| CaptureError::Spawn {
        program: cmd.program.clone(),
        source,
    })
}

/// Run `cmd` with `input` on its stdin terminal and capture both output terminals until they
/// close or `limits.timeout` elapses. A timed-out capture keeps everything read so far.
pub fn run(cmd: &CommandSpec, input: &[u8], limits: &CaptureLimits) -> Result<Capture, CaptureError> {
    let stdin_pty = open_pair()?;
    let stdout_pty = open_pair()?;
    let stderr_pty = open_pair()?;

    let child = spawn(cmd, stdin_pty.slave, stdout_pty.slave, stderr_pty.slave)?;
    let mut child = ChildGuard::new(child);
    debug!(
        "Spawned {} pid={} with {} input bytes",
        cmd.program.display(),
        child.pid(),
        input.len()
    );

    set_nonblocking(&stdin_pty.master)?;
    let mut stdin = InputStream {
        master: stdin_pty.master,
        pending: input.to_vec(),
        written: 0,
    };
    stdin.flush()?;

    let mut stdout = OutputStream::new(StreamName::Stdout, stdout_pty.master);
    let mut stderr = OutputStream::new(StreamName::Stderr, stderr_pty.master);
    let mut chunk = vec![0u8; limits.read_chunk_bytes];

    let deadline = Instant::now() + limits.timeout;
    let mut timed_out = false;

    while stdout.open || stderr.open {
        let now = Instant::now();
        if now >= deadline {
            timed_out = true;
            break;
        }

        let ready = wait_ready(&stdout, &stderr, &stdin, deadline - now)?;
        if ready.stdin {
            stdin.flush()?;
        }
        if ready.stdout {
            stdout.read_chunk(&mut chunk)?;
        }
        if ready.stderr {
            stderr.read_chunk(&mut chunk)?;
        }
    }

    let status = child.terminate().map_err(CaptureError::Reap)?;
    debug!(
        "{} finished: status={}, timed_out={}, stdout={}B, stderr={}B",
        cmd.program.display(),
        status,
        timed_out,
        stdout.buf.len(),
        stderr.buf.len()
    );

    Ok(Capture {
        stdout: stdout.buf,
        stderr: stderr.buf,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::FdFlag;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn limits(timeout_ms: u64) -> CaptureLimits {
        CaptureLimits::new(timeout_ms, 2048)
    }

    #[test]
    fn test_echoes_input_through_terminal() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "upper", "read line; echo \"got $line\"");

        let capture = run(&CommandSpec::new(&path), b"hello\n", &limits(5000)).unwrap();

        assert!(!capture.timed_out);
        // the terminal's output processing turns \n into \r\n
        assert_eq!(capture.stdout, b"got hello\r\n");
        assert!(capture.stderr.is_empty());
    }

    #[test]
    fn test_stderr_is_captured_separately() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "both", "echo out; echo err >&2");

        let capture = run(&CommandSpec::new(&path), b"", &limits(5000)).unwrap();

        assert!(!capture.timed_out);
        assert_eq!(capture.stdout, b"out\r\n");
        assert_eq!(capture.stderr, b"err\r\n");
    }

    #[test]
    fn test_child_sees_terminals() {
        let dir = TempDir::new().unwrap();
        let path = script(
            &dir,
            "isatty",
            "[ -t 0 ] && [ -t 1 ] && [ -t 2 ] && echo tty || echo pipe",
        );

        let capture = run(&CommandSpec::new(&path), b"", &limits(5000)).unwrap();

        assert_eq!(capture.stdout, b"tty\r\n");
    }

    #[test]
    fn test_timeout_keeps_partial_output() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "hang", "echo partial; exec sleep 30");

        let started = Instant::now();
        let capture = run(&CommandSpec::new(&path), b"", &limits(500)).unwrap();

        assert!(capture.timed_out);
        assert_eq!(capture.stdout, b"partial\r\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_waiting_for_input_times_out() {
        let dir = TempDir::new().unwrap();
        // no trailing newline: the line discipline never hands the line to `read`
        let path = script(&dir, "wait", "read line; echo \"$line\"");

        let capture = run(&CommandSpec::new(&path), b"no newline", &limits(300)).unwrap();

        assert!(capture.timed_out);
        assert!(capture.stdout.is_empty());
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = run(&CommandSpec::new(&missing), b"a\n", &limits(300)).unwrap_err();

        assert!(matches!(err, CaptureError::Spawn { .. }));
    }

    #[test]
    fn test_non_executable_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, "not a program").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = run(&CommandSpec::new(&path), b"", &limits(300)).unwrap_err();

        assert!(matches!(err, CaptureError::Spawn { .. }));
    }

    #[test]
    fn test_repeated_runs_do_not_leak_descriptors() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "quick", "echo ok");
        let count_fds = || std::fs::read_dir("/proc/self/fd").unwrap().count();

        run(&CommandSpec::new(&path), b"", &limits(5000)).unwrap();
        let before = count_fds();
        for _ in 0..50 {
            run(&CommandSpec::new(&path), b"", &limits(5000)).unwrap();
        }
        let after = count_fds();

        // other tests run in parallel threads and may hold descriptors at any moment; a leak
        // would show up as hundreds
        assert!(after <= before + 64, "fds before={} after={}", before, after);
    }

    #[test]
    fn test_args_are_passed() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "args", "echo \"$1 $2\"");
        let cmd = CommandSpec::new(&path).with_args(["first", "second"]);

        let capture = run(&cmd, b"", &limits(5000)).unwrap();

        assert_eq!(capture.stdout, b"first second\r\n");
    }

    #[test]
    fn test_closed_streams_end_capture_while_child_runs() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "detach", "echo hi; exec >&- 2>&-; exec sleep 30");

        let started = Instant::now();
        let capture = run(&CommandSpec::new(&path), b"", &limits(5000)).unwrap();

        // the still-running child was killed instead of waited for
        assert!(!capture.timed_out);
        assert_eq!(capture.stdout, b"hi\r\n");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_large_input_is_fed_in_pieces() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "count", "echo $(head -n 50000 | wc -l)");
        let input = b"xx\n".repeat(50000);

        let capture = run(&CommandSpec::new(&path), &input, &limits(20000)).unwrap();

        assert!(!capture.timed_out);
        assert_eq!(capture.stdout, b"50000\r\n");
    }

    #[test]
    fn test_child_exiting_with_unread_input() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "ignore", "echo bye");
        let input = b"unread\n".repeat(10000);

        let capture = run(&CommandSpec::new(&path), &input, &limits(5000)).unwrap();

        assert!(!capture.timed_out);
        assert_eq!(capture.stdout, b"bye\r\n");
    }

    #[test]
    fn test_pty_descriptors_are_close_on_exec() {
        let pair = open_pair().unwrap();

        for fd in [pair.master.as_raw_fd(), pair.slave.as_raw_fd()] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
            assert!(flags.contains(FdFlag::FD_CLOEXEC));
        }
    }
}
