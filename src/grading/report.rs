//! Per-level score report
//!
//! One row per student submission name (sorted), one column per level (sorted), followed by a
//! `possible_points` row holding each level's test count. Missing cells render as 0.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::{GradeError, GradingEngine};
use crate::batch::{BatchError, BatchRunner, LevelSelection};
use crate::config::GraderConfig;
use crate::discovery::{self, LayoutError};
use crate::overrides::OverrideStore;
use crate::persist;
use crate::suite::TestSuite;

pub const POSSIBLE_POINTS_ROW: &str = "possible_points";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Grade(#[from] GradeError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("failed to write report {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    levels: BTreeSet<String>,
    students: BTreeSet<String>,
    scores: BTreeMap<(String, String), usize>,
    possible: BTreeMap<String, usize>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_level(&mut self, level: &str) {
        self.levels.insert(level.to_string());
    }

    pub fn add_student(&mut self, student: &str) {
        self.students.insert(student.to_string());
    }

    pub fn record(&mut self, student: &str, level: &str, passed: usize) {
        self.add_level(level);
        self.add_student(student);
        self.scores
            .insert((student.to_string(), level.to_string()), passed);
    }

    pub fn set_possible(&mut self, level: &str, possible: usize) {
        self.add_level(level);
        self.possible.insert(level.to_string(), possible);
    }

    pub fn score(&self, student: &str, level: &str) -> usize {
        self.scores
            .get(&(student.to_string(), level.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn possible(&self, level: &str) -> usize {
        self.possible.get(level).copied().unwrap_or(0)
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();

        let header: Vec<&str> = std::iter::once("submission")
            .chain(self.levels.iter().map(String::as_str))
            .collect();
        push_row(&mut out, header.iter().map(|s| csv_field(s)));

        for student in &self.students {
            let row = std::iter::once(csv_field(student)).chain(
                self.levels
                    .iter()
                    .map(|level| self.score(student, level).to_string()),
            );
            push_row(&mut out, row);
        }

        let totals = std::iter::once(POSSIBLE_POINTS_ROW.to_string())
            .chain(self.levels.iter().map(|level| self.possible(level).to_string()));
        push_row(&mut out, totals);

        out
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        persist::write_atomic(path, self.to_csv().as_bytes()).map_err(|source| {
            ReportError::Write {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!("Report written to {}", path.display());
        Ok(())
    }
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let row: Vec<String> = fields.collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Capture and grade every level of `suite`. With `binaries_level` set, every level is graded
/// with that one level's binaries.
pub async fn generate_report(
    config: &GraderConfig,
    suite: &TestSuite,
    batch: &BatchRunner,
    store: &OverrideStore,
    binaries_level: Option<&str>,
) -> Result<Report, ReportError> {
    let engine = GradingEngine::new(store);
    let mut report = Report::new();

    for level in discovery::level_names(&config.submissions_dir)? {
        report.add_level(&level);
    }
    for student in discovery::student_names(&config.submissions_dir, &config.reference_prefix)? {
        report.add_student(&student);
    }

    let selection = LevelSelection::binaries_from(binaries_level.map(str::to_string));
    for level in suite.levels() {
        let run = batch.capture_level(config, suite, level, &selection).await?;
        let scores =
            engine.score_level(&run.submissions, &run.references, level, run.test_count)?;
        for score in scores {
            report.record(&score.submission, level, score.passed);
        }
        report.set_possible(level, run.test_count);
        info!("Graded level {}", level);
    }

    Ok(report)
}
