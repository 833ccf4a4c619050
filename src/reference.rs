//! Known-good captures for one level

use thiserror::Error;
use tracing::warn;

use crate::core::{Capture, Submission};

/// A reference binary was captured on fewer tests than it is being compared on
#[derive(Debug, Error, PartialEq, Eq)]
#[error("reference {name} has no capture for test #{test_index}")]
pub struct MissingReferenceCapture {
    pub name: String,
    pub test_index: usize,
}

/// Reference binaries of a level, in load order. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    binaries: Vec<Submission>,
}

impl ReferenceSet {
    pub fn new(binaries: Vec<Submission>) -> Self {
        if binaries.is_empty() {
            warn!("Reference set is empty, every automatic verdict will be unknown");
        }
        for binary in binaries.iter().filter(|b| !b.is_reference()) {
            warn!("{} was loaded as a reference but is classified as a submission", binary.name);
        }
        Self { binaries }
    }

    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.binaries.len()
    }

    pub fn binaries(&self) -> &[Submission] {
        &self.binaries
    }

    pub fn get(&self, name: &str) -> Option<&Submission> {
        self.binaries.iter().find(|b| b.name == name)
    }

    /// Each reference's capture for `test_index`, in load order
    pub fn at(
        &self,
        test_index: usize,
    ) -> Result<Vec<(&str, &Capture)>, MissingReferenceCapture> {
        self.binaries
            .iter()
            .map(|b| {
                b.capture(test_index)
                    .map(|c| (b.name.as_str(), c))
                    .ok_or_else(|| MissingReferenceCapture {
                        name: b.name.clone(),
                        test_index,
                    })
            })
            .collect()
    }

    /// Whether the references themselves produce different captures for `test_index`
    pub fn disagree_at(&self, test_index: usize) -> Result<bool, MissingReferenceCapture> {
        let captures = self.at(test_index)?;
        Ok(captures
            .windows(2)
            .any(|pair| !pair[0].1.is_equivalent(pair[1].1)))
    }
}
