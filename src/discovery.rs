//! Submission directory discovery and preflight checks
//!
//! Layout: `<submissions_dir>/<level>/<executable>`. Executables whose file name starts with
//! the reference prefix are known-good binaries, everything else is a student submission.
//! The classification happens here, once, and travels as a `Kind` tag from then on.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GraderConfig;
use crate::core::Kind;
use crate::overrides::{OverrideStore, StoreError};
use crate::suite::{SuiteError, TestSuite};

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("submissions directory {} did not exist and has been created; populate it and run again", .0.display())]
    Created(PathBuf),

    #[error("found non-directory entry {} in the submissions directory; remove all non-directory files", .0.display())]
    NotADirectory(PathBuf),

    #[error("level directory '{0}' has no entry in the test suite")]
    LevelWithoutTests(String),

    #[error("test suite level(s) {0:?} have no directory in the submissions directory")]
    TestsWithoutLevel(Vec<String>),

    #[error("no submission named '{name}' in level {level}")]
    UnknownSubmission { level: String, name: String },

    #[error("level {level} has {count} tests, there is no test #{index}")]
    TestOutOfRange {
        level: String,
        index: usize,
        count: usize,
    },

    #[error(transparent)]
    Suite(#[from] SuiteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An executable found in a level directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub name: String,
    pub path: PathBuf,
    pub kind: Kind,
}

/// Executables of one level, each list sorted by name
#[derive(Debug, Clone, Default)]
pub struct LevelBinaries {
    pub submissions: Vec<Binary>,
    pub references: Vec<Binary>,
}

pub fn classify(file_name: &str, reference_prefix: &str) -> Kind {
    if file_name.starts_with(reference_prefix) {
        Kind::Reference
    } else {
        Kind::Submission
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<std::fs::DirEntry>, LayoutError> {
    let io_err = |source| LayoutError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(io_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

/// Names of the level directories in `submissions_dir`, sorted
pub fn level_names(submissions_dir: &Path) -> Result<Vec<String>, LayoutError> {
    Ok(read_dir_sorted(submissions_dir)?
        .into_iter()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect())
}

/// Find and classify the executables of `level`
pub fn discover_level(
    submissions_dir: &Path,
    level: &str,
    reference_prefix: &str,
) -> Result<LevelBinaries, LayoutError> {
    let level_dir = submissions_dir.join(level);
    let mut found = LevelBinaries::default();

    for entry in read_dir_sorted(&level_dir)? {
        let path = entry.path();
        if path.is_dir() {
            warn!("Skipping directory {} in level {}", path.display(), level);
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let kind = classify(&name, reference_prefix);
        let binary = Binary { name, path, kind };
        match kind {
            Kind::Submission => found.submissions.push(binary),
            Kind::Reference => found.references.push(binary),
        }
    }

    debug!(
        "Level {}: {} submissions, {} references",
        level,
        found.submissions.len(),
        found.references.len()
    );
    Ok(found)
}

/// Every student submission name across all levels, sorted and deduplicated
pub fn student_names(
    submissions_dir: &Path,
    reference_prefix: &str,
) -> Result<Vec<String>, LayoutError> {
    let mut names = BTreeSet::new();
    for level in level_names(submissions_dir)? {
        let binaries = discover_level(submissions_dir, &level, reference_prefix)?;
        names.extend(binaries.submissions.into_iter().map(|b| b.name));
    }
    Ok(names.into_iter().collect())
}

/// Check that `submission` is a student binary of `binaries_level` (or `level` itself) and
/// that `test_index` is one of `level`'s tests
pub fn validate_target(
    config: &GraderConfig,
    suite: &TestSuite,
    level: &str,
    binaries_level: Option<&str>,
    submission: &str,
    test_index: usize,
) -> Result<(), LayoutError> {
    let count = suite.inputs(level)?.len();
    if test_index >= count {
        return Err(LayoutError::TestOutOfRange {
            level: level.to_string(),
            index: test_index,
            count,
        });
    }

    let source = binaries_level.unwrap_or(level);
    let binaries = discover_level(&config.submissions_dir, source, &config.reference_prefix)?;
    if !binaries.submissions.iter().any(|b| b.name == submission) {
        return Err(LayoutError::UnknownSubmission {
            level: source.to_string(),
            name: submission.to_string(),
        });
    }
    Ok(())
}

/// Make sure the suite file, the override store and the submissions directory exist, and that
/// level directories and suite levels correspond one to one
pub fn preflight(config: &GraderConfig) -> Result<(), LayoutError> {
    TestSuite::ensure_exists(&config.tests_file)?;
    OverrideStore::open(&config.overrides_file)?;

    let dir = &config.submissions_dir;
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|source| LayoutError::Io {
            path: dir.clone(),
            source,
        })?;
        return Err(LayoutError::Created(dir.clone()));
    }

    let suite = TestSuite::load(&config.tests_file)?;
    let mut missing: BTreeSet<String> = suite.levels().map(str::to_string).collect();

    for entry in read_dir_sorted(dir)? {
        if !entry.path().is_dir() {
            return Err(LayoutError::NotADirectory(entry.path()));
        }
        let level = entry.file_name().to_string_lossy().into_owned();
        if !missing.remove(&level) {
            return Err(LayoutError::LevelWithoutTests(level));
        }
    }

    if !missing.is_empty() {
        return Err(LayoutError::TestsWithoutLevel(missing.into_iter().collect()));
    }

    info!("Preflight checks passed for {}", dir.display());
    Ok(())
}
