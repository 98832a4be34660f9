//! Runner configuration.
//!
//! Filled from CLI flags; every field has a usable default.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use permatrix_core::CapabilitySet;

/// Default bound on a single run (accept, messages and exit).
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// Default report listener address; port `0` picks a free port.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:0";

/// Isolation strategy for restricted runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Strategy {
    /// Same task, no isolation
    Inline,
    /// Dedicated worker thread, in-process channel
    Worker,
    /// Separate OS process, TCP report connection
    #[default]
    Process,
}

/// Sweep configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub strategy: Strategy,
    /// The orchestrator's own capabilities; restricted runs may only narrow them
    pub host_capabilities: CapabilitySet,
    /// Address the report listener binds (process strategy)
    pub bind_addr: String,
    /// Bound on each run; `None` waits forever
    pub run_timeout: Option<Duration>,
    /// Test-name substring passed through to the engine
    pub filter: Option<String>,
    /// Program spawned in restricted-worker mode; defaults to the current executable
    pub worker_program: Option<PathBuf>,
    /// Whether console output uses ANSI colours
    pub color: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            host_capabilities: CapabilitySet::all(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            run_timeout: Some(DEFAULT_RUN_TIMEOUT),
            filter: None,
            worker_program: None,
            color: true,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_host_capabilities(mut self, host: CapabilitySet) -> Self {
        self.host_capabilities = host;
        self
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the per-run timeout from seconds; `0` disables it.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.run_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }
}
