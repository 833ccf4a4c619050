//! TTY grading harness
//!
//! Runs student executables and known-good reference executables against the same test inputs
//! with stdin, stdout and stderr attached to pseudo-terminals, then grades each submission by
//! comparing its captures with the references, honoring manual overrides.

pub mod batch;
pub mod config;
pub mod core;
pub mod discovery;
pub mod grading;
pub mod overrides;
pub mod persist;
pub mod reference;
pub mod runner;
pub mod suite;
