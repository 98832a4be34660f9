//! Matrix runner: one restricted run per capability set.
//!
//! ## Reporter Trait
//!
//! The runner uses a [`MatrixReporter`] to separate reporting from execution. Progress is passed through live, one
//! line per decoded message, and a summary block is rendered once every capability set has run.
//!
//! ## Scheduling
//!
//! Runs are strictly sequential: a context is started, drained and torn down before the next one starts. That is
//! what keeps a process worker's connection paired with the spawn that produced it.

pub mod reporter;

use std::time::{Duration, Instant};

use miette::Diagnostic;
use permatrix_core::CapabilitySet;
use thiserror::Error;

use crate::collector::{ReconcilingCollector, RunVerdict};
use crate::config::RunnerConfig;
use crate::context::{ContextError, ExecutionContext};

pub use reporter::{ConsoleReporter, MatrixReporter};

/// Errors that abort the whole sweep.
#[derive(Debug, Error, Diagnostic)]
pub enum SweepError {
    #[error("capability set '{requested}' is not within the host capabilities '{host}'")]
    #[diagnostic(
        code(permatrix::widening),
        help("restricted runs may only narrow the orchestrator's own capabilities")
    )]
    Widening {
        host: CapabilitySet,
        requested: CapabilitySet,
    },

    #[error("could not start the run for '{capabilities}'")]
    #[diagnostic(
        code(permatrix::start),
        help("no later run could succeed either, so the sweep was aborted")
    )]
    Start {
        capabilities: String,
        #[source]
        source: ContextError,
    },

    #[error("sweep setup failed")]
    #[diagnostic(code(permatrix::setup))]
    Setup(#[from] ContextError),
}

/// Verdicts of a completed sweep, in run order.
#[derive(Debug, Clone)]
pub struct MatrixReport {
    pub verdicts: Vec<RunVerdict>,
    pub duration: Duration,
}

impl MatrixReport {
    /// Overall outcome: every run passed.
    pub fn passed(&self) -> bool {
        self.verdicts.iter().all(|v| v.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunVerdict> {
        self.verdicts.iter().filter(|v| !v.passed)
    }
}

/// Drives one execution context across a collection of capability sets.
pub struct MatrixRunner<'a, C, R> {
    context: C,
    reporter: R,
    config: &'a RunnerConfig,
}

impl<'a, C: ExecutionContext, R: MatrixReporter> MatrixRunner<'a, C, R> {
    pub fn new(context: C, reporter: R, config: &'a RunnerConfig) -> Self {
        Self {
            context,
            reporter,
            config,
        }
    }

    pub fn into_reporter(self) -> R {
        self.reporter
    }

    /// Run every set in order and aggregate the verdicts.
    ///
    /// ## Errors
    ///
    /// Per-set failures are verdicts, not errors. Only setup problems (a set that would widen the host capabilities,
    /// or a context that cannot start) abort the sweep.
    #[tracing::instrument(skip_all, fields(strategy = self.context.name(), sets = sets.len()))]
    pub async fn run(&mut self, sets: &[CapabilitySet]) -> Result<MatrixReport, SweepError> {
        let host = self.config.host_capabilities;
        if let Some(requested) = sets.iter().find(|set| !set.is_subset_of(&host)) {
            return Err(SweepError::Widening {
                host,
                requested: *requested,
            });
        }

        let started = Instant::now();
        self.reporter.on_sweep_start(sets, self.context.name());

        let mut verdicts = Vec::with_capacity(sets.len());
        for capabilities in sets {
            tracing::info!(capabilities = %capabilities, "starting run");
            self.reporter.on_run_start(capabilities);

            // One budget for the whole run: bringing the unit up, every message and its exit.
            let collector = ReconcilingCollector::new(*capabilities)
                .with_timeout(self.config.run_timeout)
                .started_at(tokio::time::Instant::now());
            let handle = self
                .context
                .start(capabilities, self.config.filter.as_deref(), collector.deadline())
                .await
                .map_err(|source| SweepError::Start {
                    capabilities: capabilities.format(),
                    source,
                })?;

            let reporter = &mut self.reporter;
            let verdict = collector
                .collect(handle, |message| reporter.on_message(capabilities, message))
                .await;

            self.reporter.on_verdict(&verdict);
            verdicts.push(verdict);
        }

        let report = MatrixReport {
            verdicts,
            duration: started.elapsed(),
        };
        self.reporter.on_sweep_complete(&report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InlineContext;
    use permatrix_core::Capability;
    use permatrix_testing::{TestContext, TestOutcome, TestSuite};
    use std::sync::Arc;

    fn pass(_: &TestContext) -> TestOutcome {
        Ok(())
    }

    #[tokio::test]
    async fn test_widening_set_aborts_before_any_run() {
        let read = CapabilitySet::from_grants([Capability::Read]);
        let config = RunnerConfig::new().with_host_capabilities(read);
        let suite = Arc::new(TestSuite::new().test("a", read, pass));
        let reporter = ConsoleReporter::new(Vec::new(), false);
        let mut runner = MatrixRunner::new(InlineContext::new(suite, read), reporter, &config);

        let err = runner.run(&[read, CapabilitySet::all()]).await.unwrap_err();
        assert!(matches!(err, SweepError::Widening { .. }));
        assert!(runner.into_reporter().into_inner().is_empty());
    }

    #[tokio::test]
    async fn test_empty_sweep_passes() {
        let config = RunnerConfig::new();
        let suite = Arc::new(TestSuite::new());
        let reporter = ConsoleReporter::new(Vec::new(), false);
        let mut runner = MatrixRunner::new(InlineContext::new(suite, CapabilitySet::all()), reporter, &config);

        let report = runner.run(&[]).await.unwrap();
        assert!(report.passed());
        assert_eq!(report.failures().count(), 0);
    }
}
