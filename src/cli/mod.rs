//! CLI module for the permatrix orchestrator
//!
//! ## Commands
//!
//! - `matrix` - Run the suite once per declared capability set, isolated
//! - `current` - Run one capability set inline, without isolation
//! - `list` - Show the capability sets and the tests declared for each
//! - `worker` - Restricted-worker mode (spawned by `matrix`, hidden)
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use permatrix_core::CapabilitySet;
use permatrix_testing::TestSuite;

use crate::config::{DEFAULT_BIND_ADDR, RunnerConfig, Strategy};
use crate::version::PERMATRIX_VERSION;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Permission-matrix test orchestrator
#[derive(Parser, Debug)]
#[command(name = "permatrix")]
#[command(version = PERMATRIX_VERSION)]
#[command(about = "Run a test suite once per capability set and reconcile every run", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the suite once per declared capability set
    Matrix {
        /// Isolation strategy for each run
        #[arg(long, value_enum, default_value_t = Strategy::Process)]
        strategy: Strategy,
        /// Only run tests whose name contains this substring
        #[arg(long, value_name = "SUBSTRING")]
        filter: Option<String>,
        /// Bound on each run, in seconds (0 waits forever)
        #[arg(long = "timeout-secs", value_name = "SECS", default_value_t = 300)]
        timeout_secs: u64,
        /// Address the report listener binds (process strategy)
        #[arg(long = "bind", value_name = "ADDR", default_value = DEFAULT_BIND_ADDR)]
        bind_addr: String,
        /// Program spawned for restricted workers (default: this executable)
        #[arg(long = "worker-program", value_name = "PATH")]
        worker_program: Option<PathBuf>,
        /// Disable ANSI colours
        #[arg(long = "no-color")]
        no_color: bool,
    },

    /// Run one capability set inline, without isolation
    Current {
        /// Capability set to run (default: every capability)
        #[arg(long, value_name = "CAPS", default_value_t = CapabilitySet::all())]
        grant: CapabilitySet,
        /// Only run tests whose name contains this substring
        #[arg(long, value_name = "SUBSTRING")]
        filter: Option<String>,
        /// Disable ANSI colours
        #[arg(long = "no-color")]
        no_color: bool,
    },

    /// List capability sets and the tests declared for each
    List,

    /// Restricted-worker mode
    #[command(hide = true)]
    Worker {
        /// Capabilities to keep, comma separated
        #[arg(long, value_name = "CAPS")]
        grant: CapabilitySet,
        /// Address to report results to
        #[arg(long, value_name = "HOST:PORT")]
        report: String,
        /// Only run tests whose name contains this substring
        #[arg(last = true, value_name = "FILTER")]
        filter: Option<String>,
    },
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run(suite: TestSuite) {
    let cli = Cli::parse();

    match execute(cli, suite) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli, suite: TestSuite) -> CliResult<ExitCode> {
    match cli.command {
        Command::Matrix {
            strategy,
            filter,
            timeout_secs,
            bind_addr,
            worker_program,
            no_color,
        } => {
            let mut config = RunnerConfig::new()
                .with_strategy(strategy)
                .with_filter(filter)
                .with_timeout_secs(timeout_secs)
                .with_bind_addr(bind_addr)
                .with_color(!no_color);
            if let Some(program) = worker_program {
                config = config.with_worker_program(program);
            }
            block_on(commands::run_matrix(suite, config))
        }
        Command::Current { grant, filter, no_color } => {
            let config = RunnerConfig::new()
                .with_strategy(Strategy::Inline)
                .with_filter(filter)
                .with_color(!no_color);
            block_on(commands::run_current(suite, grant, config))
        }
        Command::List => commands::list_tests(&suite),
        Command::Worker { grant, report, filter } => commands::run_worker(&suite, grant, &report, filter.as_deref()),
    }
}

/// Drive an async command on a single-threaded runtime; there is never more than one active run.
///
/// The runtime is shut down without waiting for anything still running on it: every run has already been decided
/// by the time the command returns.
fn block_on<F: std::future::Future<Output = CliResult<ExitCode>>>(fut: F) -> CliResult<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::failure(format!("Error starting async runtime: {e}")))?;
    let result = runtime.block_on(fut);
    runtime.shutdown_background();
    result
}

// ============================================================================
// Tests
// ============================================================================
