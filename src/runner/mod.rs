//! Runner module - Execution abstraction layer
//!
//! This module runs one executable against one test input and records what it printed:
//! - `pty`: Low-level execution with stdin/stdout/stderr on separate pseudo-terminals
//! - `PtyRunner`: Async capture session that drives `pty` on the blocking pool
//!
//! The runner module does NOT:
//! - Compare outputs or determine verdicts
//! - Know about levels, references or overrides
//! - Sandbox or resource-limit the child beyond the wall-clock deadline

pub mod pty;
pub mod session;

use async_trait::async_trait;
use nix::errno::Errno;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::Capture;

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program path
    pub program: PathBuf,
    /// Arguments to the program
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }
}

/// Limits for a single capture
#[derive(Debug, Clone)]
pub struct CaptureLimits {
    /// Wall-clock deadline measured from the moment input has been handed to the terminal
    pub timeout: Duration,
    /// Upper bound for a single read from an output terminal (does not bound total output)
    pub read_chunk_bytes: usize,
}

impl CaptureLimits {
    pub fn new(timeout_ms: u64, read_chunk_bytes: usize) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            read_chunk_bytes: read_chunk_bytes.max(1),
        }
    }
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self::new(320, 2048)
    }
}

/// Which output terminal an I/O error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    Stdin,
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamName::Stdin => "stdin",
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        };
        write!(f, "{}", s)
    }
}

/// Failures that make a capture unusable. A timeout is not one of them.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to allocate pseudo-terminal: {0}")]
    Pty(#[source] Errno),

    #[error("failed to open pseudo-terminal slave {path}: {source}")]
    PtySlave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to poll pseudo-terminals: {0}")]
    Poll(#[source] Errno),

    #[error("{stream} terminal is no longer valid")]
    InvalidDescriptor { stream: StreamName },

    #[error("I/O error on {stream} terminal: {source}")]
    Io {
        stream: StreamName,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to reap child process: {0}")]
    Reap(#[source] std::io::Error),

    #[error("capture task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runner trait for capturing one executable's behavior on one input
#[async_trait]
pub trait Runner: Send + Sync {
    async fn capture(&self, executable: &Path, input: &[u8]) -> Result<Capture, CaptureError>;
}

// Re-exports
pub use session::PtyRunner;
