use std::fmt;

/// Recorded outcome of one execution against one test input
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Capture {
    /// Bytes read from the stdout terminal
    pub stdout: Vec<u8>,
    /// Bytes read from the stderr terminal
    pub stderr: Vec<u8>,
    /// Whether the wall-clock deadline expired before both streams closed
    pub timed_out: bool,
}

impl Capture {
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>, timed_out: bool) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out,
        }
    }

    /// Two captures are equivalent when stdout, stderr and the timeout flag all agree.
    pub fn is_equivalent(&self, other: &Capture) -> bool {
        self.timed_out == other.timed_out
            && self.stdout == other.stdout
            && self.stderr == other.stderr
    }

    /// Lossy UTF-8 view of stdout, for display only
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Lossy UTF-8 view of stderr, for display only
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stdout={:?} stderr={:?} timed_out={}",
            self.stdout_lossy(),
            self.stderr_lossy(),
            self.timed_out
        )
    }
}
