//! Batch capture of a level
//!
//! Runs every executable of a level through the level's test inputs, producing one
//! `Submission` per executable whose captures are index-aligned with the inputs. A failed
//! capture discards the whole batch: partial submissions never escape.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::GraderConfig;
use crate::core::Submission;
use crate::discovery::{self, Binary, LayoutError};
use crate::reference::ReferenceSet;
use crate::runner::{CaptureError, Runner};
use crate::suite::{SuiteError, TestSuite};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("capture of {executable} on test #{test_index} failed: {source}")]
    Capture {
        executable: String,
        test_index: usize,
        #[source]
        source: CaptureError,
    },

    #[error("batch worker aborted: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("batch scheduler closed")]
    Closed(#[from] tokio::sync::AcquireError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Suite(#[from] SuiteError),
}

/// Captures of every submission and reference binary of one level
#[derive(Debug, Clone)]
pub struct LevelRun {
    pub level: String,
    pub test_count: usize,
    pub submissions: Vec<Submission>,
    pub references: ReferenceSet,
}

impl LevelRun {
    pub fn submission(&self, name: &str) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.name == name)
    }
}

/// Which binaries `capture_level` runs
#[derive(Debug, Clone, Default)]
pub struct LevelSelection {
    /// Take the binaries from this level's directory instead of the graded level's own.
    /// Inputs and override keys still belong to the graded level.
    pub binaries_level: Option<String>,
    /// Only these submissions; every submission when `None`
    pub submissions: Option<Vec<String>>,
    /// Only these references; every reference when `None`
    pub references: Option<Vec<String>>,
}

impl LevelSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn binaries_from(level: Option<String>) -> Self {
        Self {
            binaries_level: level,
            ..Self::default()
        }
    }

    pub fn only_submission(mut self, name: impl Into<String>) -> Self {
        self.submissions = Some(vec![name.into()]);
        self
    }

    pub fn only_reference(mut self, name: impl Into<String>) -> Self {
        self.references = Some(vec![name.into()]);
        self
    }

    fn pick(binaries: Vec<Binary>, names: &Option<Vec<String>>) -> Vec<Binary> {
        match names {
            Some(names) => binaries
                .into_iter()
                .filter(|b| names.contains(&b.name))
                .collect(),
            None => binaries,
        }
    }
}

/// Drives executables through a level's test inputs
#[derive(Clone)]
pub struct BatchRunner {
    runner: Arc<dyn Runner>,
    workers: usize,
}

impl BatchRunner {
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self { runner, workers: 1 }
    }

    /// Allow up to `workers` executables to be captured at the same time.
    /// Captures of one executable always run one after another.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Discover the binaries selected for `level`, then capture submissions and references
    /// against the level's inputs
    pub async fn capture_level(
        &self,
        config: &GraderConfig,
        suite: &TestSuite,
        level: &str,
        selection: &LevelSelection,
    ) -> Result<LevelRun, BatchError> {
        let inputs = suite.inputs(level)?;
        let source = selection.binaries_level.as_deref().unwrap_or(level);
        if source != level {
            info!("Grading {} with the binaries of {}", level, source);
        }

        let binaries =
            discovery::discover_level(&config.submissions_dir, source, &config.reference_prefix)?;
        let submissions = LevelSelection::pick(binaries.submissions, &selection.submissions);
        let references = LevelSelection::pick(binaries.references, &selection.references);

        let submissions = self.run_level(&inputs, &submissions).await?;
        let references = self.run_level(&inputs, &references).await?;
        info!(
            "Level {} captured: {} submissions, {} references, {} tests",
            level,
            submissions.len(),
            references.len(),
            inputs.len()
        );

        Ok(LevelRun {
            level: level.to_string(),
            test_count: inputs.len(),
            submissions,
            references: ReferenceSet::new(references),
        })
    }

    /// Capture every binary against every input; the result keeps the order of `binaries`
    pub async fn run_level(
        &self,
        test_inputs: &[Vec<u8>],
        binaries: &[Binary],
    ) -> Result<Vec<Submission>, BatchError> {
        info!(
            "Running {} binaries against {} tests (workers={})",
            binaries.len(),
            test_inputs.len(),
            self.workers
        );

        if self.workers == 1 {
            let mut submissions = Vec::with_capacity(binaries.len());
            for binary in binaries {
                submissions.push(run_binary(self.runner.as_ref(), test_inputs, binary).await?);
            }
            return Ok(submissions);
        }

        let inputs: Arc<[Vec<u8>]> = test_inputs.into();
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (idx, binary) in binaries.iter().cloned().enumerate() {
            let runner = Arc::clone(&self.runner);
            let inputs = Arc::clone(&inputs);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (idx, Err(e.into())),
                };
                (idx, run_binary(runner.as_ref(), &inputs, &binary).await)
            });
        }

        let mut slots: Vec<Option<Submission>> = vec![None; binaries.len()];
        while let Some(joined) = tasks.join_next().await {
            let (idx, result) = joined?;
            // dropping `tasks` on error aborts the remaining executables
            slots[idx] = Some(result?);
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

async fn run_binary(
    runner: &dyn Runner,
    test_inputs: &[Vec<u8>],
    binary: &Binary,
) -> Result<Submission, BatchError> {
    let mut captures = Vec::with_capacity(test_inputs.len());
    for (test_index, input) in test_inputs.iter().enumerate() {
        let capture = runner
            .capture(&binary.path, input)
            .await
            .map_err(|source| BatchError::Capture {
                executable: binary.name.clone(),
                test_index,
                source,
            })?;
        captures.push(capture);
    }
    debug!("Captured {} tests for {}", captures.len(), binary.name);

    Ok(Submission {
        name: binary.name.clone(),
        path: binary.path.clone(),
        kind: binary.kind,
        captures,
    })
}
