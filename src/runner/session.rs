//! Capture session
//!
//! Runs exactly one (executable, input) pair under pseudo-terminals with a fixed deadline
//! policy. The blocking capture loop runs on tokio's blocking pool.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use super::{pty, CaptureError, CaptureLimits, CommandSpec, Runner};
use crate::config::GraderConfig;
use crate::core::Capture;

/// Runner that captures executables attached to pseudo-terminals
#[derive(Debug, Clone, Default)]
pub struct PtyRunner {
    limits: CaptureLimits,
}

impl PtyRunner {
    pub fn new(limits: CaptureLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &GraderConfig) -> Self {
        Self::new(CaptureLimits::new(
            config.timeout_ms,
            config.read_chunk_bytes,
        ))
    }
}

#[async_trait]
impl Runner for PtyRunner {
    async fn capture(&self, executable: &Path, input: &[u8]) -> Result<Capture, CaptureError> {
        let cmd = CommandSpec::new(executable);
        let input = input.to_vec();
        let limits = self.limits.clone();

        let capture =
            tokio::task::spawn_blocking(move || pty::run(&cmd, &input, &limits)).await??;

        if capture.timed_out {
            debug!(
                "{} timed out after {:?}",
                executable.display(),
                self.limits.timeout
            );
        }
        Ok(capture)
    }
}
