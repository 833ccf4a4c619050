//! Test suite file handling
//!
//! The suite is a JSON object mapping each level name to its ordered list of stdin inputs:
//!
//! ```json
//! { "level1": ["a\n", "b\n"], "level2": ["quit\n"] }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::persist;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("failed to read test suite {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("test suite {} is not valid: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write test suite {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown level: {0}")]
    UnknownLevel(String),
}

/// Ordered test inputs per level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestSuite {
    levels: BTreeMap<String, Vec<String>>,
}

impl TestSuite {
    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let content = std::fs::read_to_string(path).map_err(|source| SuiteError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SuiteError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), SuiteError> {
        persist::write_json_atomic(path, self).map_err(|source| SuiteError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Create an empty suite file if none exists
    pub fn ensure_exists(path: &Path) -> Result<(), SuiteError> {
        let created = persist::ensure_json_object(path).map_err(|source| SuiteError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        if created {
            warn!(
                "Test suite {} did not exist, created an empty one",
                path.display()
            );
        }
        Ok(())
    }

    /// Level names in sorted order
    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.levels.keys().map(String::as_str)
    }

    /// Test inputs of `level` as the exact bytes written to stdin, in index order
    pub fn inputs(&self, level: &str) -> Result<Vec<Vec<u8>>, SuiteError> {
        self.levels
            .get(level)
            .map(|tests| tests.iter().map(|t| t.as_bytes().to_vec()).collect())
            .ok_or_else(|| SuiteError::UnknownLevel(level.to_string()))
    }

    pub fn insert_level(&mut self, level: impl Into<String>, tests: Vec<String>) {
        self.levels.insert(level.into(), tests);
    }

    /// Append a test written on a single line, where a literal `\n` stands for a newline.
    /// Returns the index of the new test.
    pub fn add_test(
        &mut self,
        level: &str,
        raw: &str,
        ensure_trailing_newline: bool,
    ) -> Result<usize, SuiteError> {
        let tests = self
            .levels
            .get_mut(level)
            .ok_or_else(|| SuiteError::UnknownLevel(level.to_string()))?;

        let mut input = unescape_newlines(raw);
        if !input.ends_with('\n') {
            if ensure_trailing_newline {
                input.push('\n');
            } else {
                warn!("Test for {} has no terminal newline and will likely time out", level);
            }
        }

        tests.push(input);
        info!("Added test #{} to {}", tests.len() - 1, level);
        Ok(tests.len() - 1)
    }
}

pub fn unescape_newlines(raw: &str) -> String {
    raw.replace("\\n", "\n")
}
