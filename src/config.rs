//! Grader configuration
//!
//! Loaded from an optional TOML file, then overridden by `GRADER_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info};

/// Default config file looked up when neither `--config` nor `GRADER_CONFIG` is given
pub const DEFAULT_CONFIG_FILE: &str = "grader.toml";

/// Grader configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraderConfig {
    /// Directory holding one sub-directory of executables per level
    pub submissions_dir: PathBuf,
    /// JSON file mapping level name to its ordered test inputs
    pub tests_file: PathBuf,
    /// JSON file holding manual ok / not ok overrides
    pub overrides_file: PathBuf,
    /// Destination of the CSV report
    pub report_file: PathBuf,
    /// File name prefix marking known-good binaries
    pub reference_prefix: String,
    /// Wall-clock deadline per capture in milliseconds (default: 320ms)
    pub timeout_ms: u64,
    /// Maximum bytes per read from an output terminal (default: 2048)
    pub read_chunk_bytes: usize,
    /// Executables captured concurrently (default: 1)
    pub workers: usize,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            submissions_dir: PathBuf::from("submissions"),
            tests_file: PathBuf::from("tests.json"),
            overrides_file: PathBuf::from("ok.json"),
            report_file: PathBuf::from("report.csv"),
            reference_prefix: "good_".to_string(),
            timeout_ms: 320,
            read_chunk_bytes: 2048,
            workers: 1,
        }
    }
}

impl GraderConfig {
    /// Load configuration from `path` (if it exists) and apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("GRADER_CONFIG").map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("No config file, using defaults");
                Self::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded grader configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `GRADER_*` overrides looked up through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup("GRADER_SUBMISSIONS_DIR") {
            self.submissions_dir = v.into();
        }
        if let Some(v) = lookup("GRADER_TESTS_FILE") {
            self.tests_file = v.into();
        }
        if let Some(v) = lookup("GRADER_OVERRIDES_FILE") {
            self.overrides_file = v.into();
        }
        if let Some(v) = lookup("GRADER_REPORT_FILE") {
            self.report_file = v.into();
        }
        if let Some(v) = lookup("GRADER_REFERENCE_PREFIX") {
            self.reference_prefix = v;
        }
        if let Some(v) = lookup("GRADER_TIMEOUT_MS") {
            self.timeout_ms = v
                .parse()
                .with_context(|| format!("Invalid GRADER_TIMEOUT_MS: {}", v))?;
        }
        if let Some(v) = lookup("GRADER_READ_CHUNK_BYTES") {
            self.read_chunk_bytes = v
                .parse()
                .with_context(|| format!("Invalid GRADER_READ_CHUNK_BYTES: {}", v))?;
        }
        if let Some(v) = lookup("GRADER_WORKERS") {
            self.workers = v
                .parse()
                .with_context(|| format!("Invalid GRADER_WORKERS: {}", v))?;
        }

        if self.reference_prefix.is_empty() {
            anyhow::bail!("reference_prefix must not be empty");
        }
        self.workers = self.workers.max(1);
        Ok(())
    }
}
