//! Manual verdict overrides
//!
//! Persisted as the JSON object `{ "<submission>": { "<level>x<test>": 0 | 1 } }`. Every read
//! reloads the file, and every write rewrites the whole file through a temp file and a rename.
//! Only one writer is expected at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::persist;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read override store {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("override store {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write override store {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Stored flag; older files may hold booleans instead of 0/1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredFlag {
    Int(i64),
    Bool(bool),
}

impl StoredFlag {
    fn is_ok(self) -> bool {
        match self {
            StoredFlag::Int(n) => n != 0,
            StoredFlag::Bool(b) => b,
        }
    }
}

impl From<bool> for StoredFlag {
    fn from(ok: bool) -> Self {
        StoredFlag::Int(if ok { 1 } else { 0 })
    }
}

type StoreContents = BTreeMap<String, BTreeMap<String, StoredFlag>>;

fn entry_key(level: &str, test_index: usize) -> String {
    format!("{}x{}", level, test_index)
}

/// File-backed override store
#[derive(Debug, Clone)]
pub struct OverrideStore {
    path: PathBuf,
}

impl OverrideStore {
    /// Open the store at `path`, creating an empty one if missing. A store that exists but
    /// cannot be read or parsed is rejected here.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let created = persist::ensure_json_object(&path).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        if created {
            warn!(
                "Override store {} did not exist, created an empty one",
                path.display()
            );
        }

        let store = Self { path };
        let contents = store.load()?;
        debug!(
            "Opened override store {} ({} submissions)",
            store.path.display(),
            contents.len()
        );
        Ok(store)
    }

    fn load(&self) -> Result<StoreContents, StoreError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Stored verdict for the key, or `None` if it was never set
    pub fn get(
        &self,
        submission: &str,
        level: &str,
        test_index: usize,
    ) -> Result<Option<bool>, StoreError> {
        let contents = self.load()?;
        Ok(contents
            .get(submission)
            .and_then(|entries| entries.get(&entry_key(level, test_index)))
            .map(|flag| flag.is_ok()))
    }

    /// Persist `ok` for the key, replacing any earlier verdict
    pub fn set(
        &self,
        submission: &str,
        level: &str,
        test_index: usize,
        ok: bool,
    ) -> Result<(), StoreError> {
        let mut contents = self.load()?;
        contents
            .entry(submission.to_string())
            .or_default()
            .insert(entry_key(level, test_index), ok.into());

        persist::write_json_atomic(&self.path, &contents).map_err(|source| {
            StoreError::Write {
                path: self.path.clone(),
                source,
            }
        })?;
        info!(
            "Marked {} {} test #{} as {}",
            submission,
            level,
            test_index,
            if ok { "ok" } else { "not ok" }
        );
        Ok(())
    }
}
