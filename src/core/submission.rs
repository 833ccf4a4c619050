use std::path::PathBuf;

use super::Capture;

/// Classification assigned once when binaries are discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Student submission being graded
    Submission,
    /// Trusted known-good implementation
    Reference,
}

/// An executable together with its captures for every test input of a level, in index order
#[derive(Debug, Clone)]
pub struct Submission {
    pub name: String,
    pub path: PathBuf,
    pub kind: Kind,
    pub captures: Vec<Capture>,
}

impl Submission {
    pub fn capture(&self, test_index: usize) -> Option<&Capture> {
        self.captures.get(test_index)
    }

    pub fn is_reference(&self) -> bool {
        self.kind == Kind::Reference
    }
}
