//! Grading engine
//!
//! Decides per-test verdicts and per-level scores:
//! 1. A manual override for (submission, level, test) always wins
//! 2. Otherwise the first reference binary, in load order, whose capture is equivalent
//! 3. Otherwise the verdict is unknown
//!
//! The grading module does NOT run programs; it only reads captures and the override store.

pub mod report;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{Capture, Submission, Verdict};
use crate::overrides::{OverrideStore, StoreError};
use crate::reference::{MissingReferenceCapture, ReferenceSet};

#[derive(Debug, Error)]
pub enum GradeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{submission} has no capture for test #{test_index}")]
    MissingCapture {
        submission: String,
        test_index: usize,
    },

    #[error(transparent)]
    MissingReference(#[from] MissingReferenceCapture),
}

/// Score of one submission on one level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelScore {
    pub submission: String,
    pub passed: usize,
    pub possible: usize,
}

/// Field-wise agreement between a submission and one chosen reference on one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub stdout_matches: bool,
    pub stderr_matches: bool,
    pub submission_timed_out: bool,
    pub reference_timed_out: bool,
}

impl Comparison {
    pub fn between(submission: &Capture, reference: &Capture) -> Self {
        Self {
            stdout_matches: submission.stdout == reference.stdout,
            stderr_matches: submission.stderr == reference.stderr,
            submission_timed_out: submission.timed_out,
            reference_timed_out: reference.timed_out,
        }
    }

    pub fn timeout_matches(&self) -> bool {
        self.submission_timed_out == self.reference_timed_out
    }

    /// Same result as `Capture::is_equivalent`
    pub fn is_match(&self) -> bool {
        self.stdout_matches && self.stderr_matches && self.timeout_matches()
    }
}

/// Computes verdicts from captures, references and the override store
pub struct GradingEngine<'a> {
    overrides: &'a OverrideStore,
}

impl<'a> GradingEngine<'a> {
    pub fn new(overrides: &'a OverrideStore) -> Self {
        Self { overrides }
    }

    /// Verdict of `submission` on `test_index` of `level`
    pub fn grade(
        &self,
        submission: &Submission,
        test_index: usize,
        references: &ReferenceSet,
        level: &str,
    ) -> Result<Verdict, GradeError> {
        if let Some(ok) = self.overrides.get(&submission.name, level, test_index)? {
            debug!(
                "{} {} test #{}: manual override {}",
                submission.name, level, test_index, ok
            );
            return Ok(Verdict::Manual(ok));
        }

        let capture = submission
            .capture(test_index)
            .ok_or_else(|| GradeError::MissingCapture {
                submission: submission.name.clone(),
                test_index,
            })?;

        Ok(Verdict::Automatic(find_match(capture, test_index, references)?))
    }

    /// Verdict for every test of `submission`, in index order
    pub fn overview(
        &self,
        submission: &Submission,
        references: &ReferenceSet,
        level: &str,
    ) -> Result<Vec<Verdict>, GradeError> {
        (0..submission.captures.len())
            .map(|i| self.grade(submission, i, references, level))
            .collect()
    }

    /// Number of passed tests out of `test_count`
    pub fn score(
        &self,
        submission: &Submission,
        references: &ReferenceSet,
        level: &str,
        test_count: usize,
    ) -> Result<LevelScore, GradeError> {
        let mut passed = 0;
        for i in 0..test_count {
            if self.grade(submission, i, references, level)?.passed() {
                passed += 1;
            }
        }
        Ok(LevelScore {
            submission: submission.name.clone(),
            passed,
            possible: test_count,
        })
    }

    /// Scores of every submission of a level
    pub fn score_level(
        &self,
        submissions: &[Submission],
        references: &ReferenceSet,
        level: &str,
        test_count: usize,
    ) -> Result<Vec<LevelScore>, GradeError> {
        for i in 0..test_count {
            if references.disagree_at(i)? {
                warn!("{} test #{}: reference binaries disagree", level, i);
            }
        }
        submissions
            .iter()
            .map(|s| self.score(s, references, level, test_count))
            .collect()
    }
}

/// Name of the first reference whose capture at `test_index` is equivalent to `capture`
pub fn find_match(
    capture: &Capture,
    test_index: usize,
    references: &ReferenceSet,
) -> Result<Option<String>, MissingReferenceCapture> {
    Ok(references
        .at(test_index)?
        .into_iter()
        .find(|(_, reference)| capture.is_equivalent(reference))
        .map(|(name, _)| name.to_string()))
}

/// Compare `submission` against the reference named `reference` on `test_index`
pub fn compare(
    submission: &Submission,
    reference: &Submission,
    test_index: usize,
) -> Result<Comparison, GradeError> {
    let missing = |s: &Submission| GradeError::MissingCapture {
        submission: s.name.clone(),
        test_index,
    };
    let ours = submission.capture(test_index).ok_or_else(|| missing(submission))?;
    let theirs = reference.capture(test_index).ok_or_else(|| missing(reference))?;
    Ok(Comparison::between(ours, theirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Kind;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn binary(name: &str, kind: Kind, captures: Vec<Capture>) -> Submission {
        Submission {
            name: name.to_string(),
            path: PathBuf::from(name),
            kind,
            captures,
        }
    }

    fn out(stdout: &str) -> Capture {
        Capture::new(stdout, "", false)
    }

    fn hung(stdout: &str) -> Capture {
        Capture::new(stdout, "", true)
    }

    fn store(dir: &TempDir) -> OverrideStore {
        OverrideStore::open(dir.path().join("ok.json")).unwrap()
    }

    fn good_x() -> ReferenceSet {
        ReferenceSet::new(vec![binary(
            "good_x",
            Kind::Reference,
            vec![out("A\n"), out("B\n")],
        )])
    }

    #[test]
    fn test_identical_submission_scores_full() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let stud = binary("stud_y", Kind::Submission, vec![out("A\n"), out("B\n")]);

        let verdicts = engine.overview(&stud, &good_x(), "level1").unwrap();
        let score = engine.score(&stud, &good_x(), "level1", 2).unwrap();

        assert_eq!(
            verdicts,
            vec![
                Verdict::Automatic(Some("good_x".into())),
                Verdict::Automatic(Some("good_x".into()))
            ]
        );
        assert_eq!((score.passed, score.possible), (2, 2));
    }

    #[test]
    fn test_timeout_mismatch_is_unknown_until_overridden() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let stud = binary("stud_y", Kind::Submission, vec![out("A\n"), hung("")]);

        assert_eq!(
            engine.grade(&stud, 1, &good_x(), "level1").unwrap(),
            Verdict::Automatic(None)
        );
        assert_eq!(engine.score(&stud, &good_x(), "level1", 2).unwrap().passed, 1);

        store.set("stud_y", "level1", 1, true).unwrap();

        assert_eq!(
            engine.grade(&stud, 1, &good_x(), "level1").unwrap(),
            Verdict::Manual(true)
        );
        assert_eq!(engine.score(&stud, &good_x(), "level1", 2).unwrap().passed, 2);
    }

    #[test]
    fn test_manual_false_beats_automatic_match() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let stud = binary("stud_y", Kind::Submission, vec![out("A\n"), out("B\n")]);

        store.set("stud_y", "level1", 0, false).unwrap();

        assert_eq!(
            engine.grade(&stud, 0, &good_x(), "level1").unwrap(),
            Verdict::Manual(false)
        );
        assert_eq!(engine.score(&stud, &good_x(), "level1", 2).unwrap().passed, 1);
    }

    #[test]
    fn test_override_is_scoped_to_level_and_name() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let stud = binary("stud_y", Kind::Submission, vec![out("wrong")]);

        store.set("stud_y", "level2", 0, true).unwrap();
        store.set("stud_z", "level1", 0, true).unwrap();

        assert_eq!(
            engine.grade(&stud, 0, &good_x(), "level1").unwrap(),
            Verdict::Automatic(None)
        );
    }

    #[test]
    fn test_first_loaded_reference_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let refs = ReferenceSet::new(vec![
            binary("good_r1", Kind::Reference, vec![out("same")]),
            binary("good_r2", Kind::Reference, vec![out("same")]),
        ]);
        let stud = binary("stud_y", Kind::Submission, vec![out("same")]);

        assert_eq!(
            engine.grade(&stud, 0, &refs, "level1").unwrap(),
            Verdict::Automatic(Some("good_r1".into()))
        );
    }

    #[test]
    fn test_later_reference_matches_when_first_does_not() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let refs = ReferenceSet::new(vec![
            binary("good_r1", Kind::Reference, vec![out("one")]),
            binary("good_r2", Kind::Reference, vec![out("two")]),
        ]);
        let stud = binary("stud_y", Kind::Submission, vec![out("two")]);

        assert_eq!(
            engine.grade(&stud, 0, &refs, "level1").unwrap(),
            Verdict::Automatic(Some("good_r2".into()))
        );
    }

    #[test]
    fn test_both_timing_out_is_a_match() {
        let refs = ReferenceSet::new(vec![binary("good_x", Kind::Reference, vec![hung("> ")])]);

        assert_eq!(
            find_match(&hung("> "), 0, &refs).unwrap(),
            Some("good_x".into())
        );
    }

    #[test]
    fn test_empty_reference_set_gives_unknown() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let stud = binary("stud_y", Kind::Submission, vec![out("A\n")]);

        let scores = engine
            .score_level(&[stud], &ReferenceSet::default(), "level1", 1)
            .unwrap();

        assert_eq!(scores[0].passed, 0);
        assert_eq!(scores[0].possible, 1);
    }

    #[test]
    fn test_missing_capture_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let stud = binary("stud_y", Kind::Submission, vec![]);

        assert!(matches!(
            engine.grade(&stud, 0, &good_x(), "level1"),
            Err(GradeError::MissingCapture { .. })
        ));
    }

    #[test]
    fn test_reference_without_capture_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let engine = GradingEngine::new(&store);
        let refs = ReferenceSet::new(vec![binary("good_x", Kind::Reference, vec![out("A\n")])]);
        let stud = binary("stud_y", Kind::Submission, vec![out("A\n"), out("B\n")]);

        assert!(matches!(
            engine.grade(&stud, 1, &refs, "level1"),
            Err(GradeError::MissingReference(_))
        ));
        assert!(matches!(
            engine.score_level(&[stud], &refs, "level1", 2),
            Err(GradeError::MissingReference(_))
        ));
    }

    #[test]
    fn test_compare_reports_each_field() {
        let stud = binary(
            "stud_y",
            Kind::Submission,
            vec![Capture::new("A\n", "warn\n", true)],
        );
        let good = binary("good_x", Kind::Reference, vec![out("A\n")]);

        let cmp = compare(&stud, &good, 0).unwrap();

        assert!(cmp.stdout_matches);
        assert!(!cmp.stderr_matches);
        assert!(cmp.submission_timed_out);
        assert!(!cmp.reference_timed_out);
        assert!(!cmp.is_match());
    }

    #[tokio::test]
    async fn test_scripts_graded_end_to_end() {
        use crate::batch::{BatchRunner, LevelSelection};
        use crate::config::GraderConfig;
        use crate::runner::{CaptureLimits, PtyRunner};
        use crate::suite::TestSuite;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let config = GraderConfig {
            submissions_dir: dir.path().join("submissions"),
            overrides_file: dir.path().join("ok.json"),
            ..GraderConfig::default()
        };
        let level_dir = config.submissions_dir.join("level1");
        std::fs::create_dir_all(&level_dir).unwrap();
        let scripts = [
            ("good_x", "read l; [ \"$l\" = a ] && echo A || echo B"),
            ("stud_y", "read l; [ \"$l\" = a ] && echo A || echo B"),
            ("stud_z", "read l; [ \"$l\" = a ] && echo A || exec sleep 30"),
        ];
        for (name, body) in scripts {
            let path = level_dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let mut suite = TestSuite::default();
        suite.insert_level("level1", vec!["a\n".into(), "b\n".into()]);

        let runner = PtyRunner::new(CaptureLimits::new(2000, 2048));
        let run = BatchRunner::new(Arc::new(runner))
            .capture_level(&config, &suite, "level1", &LevelSelection::all())
            .await
            .unwrap();
        let store = OverrideStore::open(&config.overrides_file).unwrap();
        let engine = GradingEngine::new(&store);
        let stud_y = run.submission("stud_y").unwrap();
        let stud_z = run.submission("stud_z").unwrap();

        assert_eq!(
            engine.overview(stud_y, &run.references, "level1").unwrap(),
            vec![
                Verdict::Automatic(Some("good_x".into())),
                Verdict::Automatic(Some("good_x".into()))
            ]
        );
        assert_eq!(engine.score(stud_y, &run.references, "level1", 2).unwrap().passed, 2);

        assert!(stud_z.captures[1].timed_out);
        assert_eq!(
            engine.grade(stud_z, 1, &run.references, "level1").unwrap(),
            Verdict::Automatic(None)
        );
        assert_eq!(engine.score(stud_z, &run.references, "level1", 2).unwrap().passed, 1);

        store.set("stud_z", "level1", 1, true).unwrap();

        assert_eq!(engine.score(stud_z, &run.references, "level1", 2).unwrap().passed, 2);
    }
}
