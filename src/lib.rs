#![forbid(unsafe_code)]
//! Permission-matrix test orchestrator
//!
//! permatrix re-runs one test suite once per capability set its tests declare, each run isolated and restricted to
//! exactly that set, and checks that every run completed every test it announced. A run that crashes partway is
//! caught by count reconciliation, not by waiting for a test to report a failure.
//!
//! - [`context`]: the three execution strategies (inline, worker thread, OS process)
//! - [`collector`]: turns one run's message stream into a verdict
//! - [`matrix`]: sequences runs across capability sets and reports them
//! - [`cli`]: the `permatrix` command line, including restricted-worker mode
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` and `context` modules
//!   enforce `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **Test bodies**: a panic inside a test body is caught by the engine and reported as a failed test, never as a
//!   crashed run.

pub mod cli;
pub mod collector;
pub mod config;
pub mod context;
pub mod matrix;
pub mod probes;
pub mod version;

pub use collector::{ReconcilingCollector, RunFailure, RunVerdict};
pub use config::{RunnerConfig, Strategy};
pub use context::{ExecutionContext, ExitOutcome, InlineContext, ProcessContext, RunHandle, WorkerContext};
pub use matrix::{ConsoleReporter, MatrixReport, MatrixReporter, MatrixRunner, SweepError};
