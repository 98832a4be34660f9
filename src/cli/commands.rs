//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::env;
use std::io::BufWriter;
use std::net::TcpStream;
use std::sync::Arc;

use permatrix_core::CapabilitySet;
use permatrix_testing::{LineSink, TestContext, TestSuite, run_suite};

use super::{CliError, CliResult, ExitCode};
use crate::config::{RunnerConfig, Strategy};
use crate::context::{ContextError, ExecutionContext, InlineContext, ProcessContext, WorkerContext};
use crate::matrix::{ConsoleReporter, MatrixReport, MatrixRunner, SweepError};

// ============================================================================
// Matrix sweep
// ============================================================================

/// Run every capability set the suite declares, isolated by `config.strategy`.
pub async fn run_matrix(suite: TestSuite, config: RunnerConfig) -> CliResult<ExitCode> {
    let sets = suite.capability_combinations();
    let suite = Arc::new(suite);
    let host = config.host_capabilities;

    let report = match config.strategy {
        Strategy::Inline => sweep(InlineContext::new(suite, host), &config, &sets).await,
        Strategy::Worker => sweep(WorkerContext::new(suite, host), &config, &sets).await,
        Strategy::Process => {
            let program = match &config.worker_program {
                Some(program) => program.clone(),
                None => env::current_exe().map_err(|e| render(ContextError::Program(e).into()))?,
            };
            let context = ProcessContext::bind(&config.bind_addr, program)
                .await
                .map_err(|e| render(e.into()))?;
            sweep(context, &config, &sets).await
        }
    }?;

    outcome(&report)
}

/// Run one capability set inline with the host's permissions, outside the sweep.
pub async fn run_current(suite: TestSuite, grant: CapabilitySet, config: RunnerConfig) -> CliResult<ExitCode> {
    let context = InlineContext::new(Arc::new(suite), config.host_capabilities);
    let report = sweep(context, &config, &[grant]).await?;
    outcome(&report)
}

async fn sweep<C: ExecutionContext>(
    context: C,
    config: &RunnerConfig,
    sets: &[CapabilitySet],
) -> CliResult<MatrixReport> {
    let reporter = ConsoleReporter::stdout(config.color);
    let mut runner = MatrixRunner::new(context, reporter, config);
    runner.run(sets).await.map_err(render)
}

fn outcome(report: &MatrixReport) -> CliResult<ExitCode> {
    if report.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        // The summary has already been printed.
        Err(CliError::new("", ExitCode::FAILURE))
    }
}

fn render(err: SweepError) -> CliError {
    CliError::failure(format!("{:?}", miette::Report::new(err)))
}

// ============================================================================
// Listing
// ============================================================================

/// Print each capability set followed by the tests declared for it.
pub fn list_tests(suite: &TestSuite) -> CliResult<ExitCode> {
    for caps in suite.capability_combinations() {
        println!("{caps}");
        for test in suite.select(&caps, None) {
            if test.ignore {
                println!("  {} (ignored)", test.name);
            } else {
                println!("  {}", test.name);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Restricted worker
// ============================================================================

/// Restricted-worker mode: narrow first, then connect back and stream the run.
///
/// Test failures are reported over the connection; the exit code only reflects whether reporting itself worked.
pub fn run_worker(suite: &TestSuite, grant: CapabilitySet, report: &str, filter: Option<&str>) -> CliResult<ExitCode> {
    let ctx = TestContext::restricted(&CapabilitySet::all(), &grant)
        .map_err(|e| CliError::failure(format!("Error applying capabilities: {e}")))?;

    let stream = TcpStream::connect(report)
        .map_err(|e| CliError::failure(format!("Error connecting to reporter at {report}: {e}")))?;
    let _ = stream.set_nodelay(true);
    tracing::debug!(report, capabilities = %ctx.capabilities(), "connected to reporter");

    let mut sink = LineSink::new(BufWriter::new(stream));
    run_suite(suite, &ctx, filter, &mut sink).map_err(|e| CliError::failure(format!("Error reporting results: {e}")))?;
    Ok(ExitCode::SUCCESS)
}
