//! Core data model shared by the capture and grading layers
//!
//! Everything here is plain data: no I/O, no process handling.

pub mod capture;
pub mod submission;
pub mod verdict;

pub use capture::Capture;
pub use submission::{Kind, Submission};
pub use verdict::{Verdict, VerdictSource};
