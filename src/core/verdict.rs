use std::fmt;

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Manual,
    Automatic,
}

/// Verdict for one submission on one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Human-asserted ok / not ok, read from the override store
    Manual(bool),
    /// Name of the first matching reference binary, or `None` when nothing matched
    Automatic(Option<String>),
}

impl Verdict {
    pub fn source(&self) -> VerdictSource {
        match self {
            Verdict::Manual(_) => VerdictSource::Manual,
            Verdict::Automatic(_) => VerdictSource::Automatic,
        }
    }

    /// Counts toward the level score
    pub fn passed(&self) -> bool {
        match self {
            Verdict::Manual(ok) => *ok,
            Verdict::Automatic(matched) => matched.is_some(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Verdict::Automatic(None))
    }
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictSource::Manual => "manual",
            VerdictSource::Automatic => "automatic",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Manual(true) => write!(f, "manually marked ok"),
            Verdict::Manual(false) => write!(f, "manually marked not ok"),
            Verdict::Automatic(Some(name)) => write!(f, "matches {}", name),
            Verdict::Automatic(None) => write!(f, "no known-good match"),
        }
    }
}
