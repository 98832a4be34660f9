//! Execution contexts: the isolation strategies a restricted run can use.
//!
//! Every strategy satisfies the same contract ([`ExecutionContext::start`]): given a capability set and an optional
//! filter, start one restricted run and hand back a [`RunHandle`] holding
//! - a lazy, finite, non-restartable [`MessageStream`] of decoded protocol messages, and
//! - an [`ExitFuture`] that resolves only once the run has fully terminated.
//!
//! ## Strategies
//!
//! - [`InlineContext`]: runs the engine on the calling task. No isolation; used for the host-permissions mode.
//! - [`WorkerContext`]: runs the engine on a dedicated worker thread, reporting over an in-process channel.
//! - [`ProcessContext`]: spawns this program in restricted-worker mode and reads results from a TCP connection.
//!
//! ## Notes
//!
//! - Capabilities are narrowed (never widened) before the engine selects or runs anything.
//! - A handle belongs to exactly one run. Dropping it tears the run down: the stream closes its connection or
//!   channel, and a spawned process is killed if it is still alive.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod inline;
pub mod process;
mod stream;
pub mod worker;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitStatus;

use permatrix_core::protocol::{self, ProtocolMessage};
use permatrix_core::{CapabilityError, CapabilitySet};
use permatrix_testing::{EngineError, EventSink};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use inline::InlineContext;
pub use process::ProcessContext;
pub use stream::MessageStream;
pub use worker::WorkerContext;

/// How a restricted run terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Abnormal {
        /// Raw exit code, when the run had one.
        code: Option<i32>,
        diagnostic: String,
    },
    /// Still running at the run's deadline and torn down.
    TimedOut { diagnostic: String },
}

impl ExitOutcome {
    pub fn abnormal(code: Option<i32>, diagnostic: impl Into<String>) -> Self {
        ExitOutcome::Abnormal {
            code,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn timed_out(diagnostic: impl Into<String>) -> Self {
        ExitOutcome::TimedOut {
            diagnostic: diagnostic.into(),
        }
    }

    /// Human-readable detail for anything but a clean exit.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            ExitOutcome::Success => None,
            ExitOutcome::Abnormal { diagnostic, .. } | ExitOutcome::TimedOut { diagnostic } => Some(diagnostic),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }

    /// Map a process exit status (a signal shows up as `code: None`).
    pub fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            ExitOutcome::Success
        } else {
            ExitOutcome::abnormal(status.code(), format!("process {status}"))
        }
    }

    /// Wrap an already-known outcome as an [`ExitFuture`].
    pub fn ready(self) -> ExitFuture {
        Box::pin(std::future::ready(self))
    }
}

/// Resolves once the run has fully terminated.
pub type ExitFuture = Pin<Box<dyn Future<Output = ExitOutcome> + Send>>;

/// One started run.
pub struct RunHandle {
    pub messages: MessageStream,
    pub exit: ExitFuture,
}

impl RunHandle {
    pub fn new(messages: MessageStream, exit: ExitFuture) -> Self {
        Self { messages, exit }
    }
}

/// Errors that prevent a run from starting at all.
///
/// These are setup failures: the sweep aborts instead of recording a failed verdict.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to bind report listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn restricted worker '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start worker thread: {0}")]
    Thread(#[source] io::Error),

    #[error("failed to accept reporter connection: {0}")]
    Accept(#[source] io::Error),

    #[error("cannot locate the worker program: {0}")]
    Program(#[source] io::Error),

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// An isolation strategy for restricted runs.
pub trait ExecutionContext {
    /// Strategy name for logs and reports.
    fn name(&self) -> &'static str;

    /// Start one run under `capabilities`, optionally filtered by test name.
    ///
    /// `deadline` is the run's whole budget. A context that has to wait for its unit to come up (the process
    /// strategy waits for a connection) stops waiting there and hands back [`ExitOutcome::TimedOut`].
    fn start(
        &mut self,
        capabilities: &CapabilitySet,
        filter: Option<&str>,
        deadline: Option<Instant>,
    ) -> impl Future<Output = Result<RunHandle, ContextError>>;
}

/// Engine sink that sends encoded lines over an in-process channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, message: &ProtocolMessage) -> Result<(), EngineError> {
        self.tx
            .send(protocol::encode(message))
            .map_err(|_| EngineError::SinkClosed("orchestrator stopped listening".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_outcome_resolves_immediately() {
        let outcome = ExitOutcome::abnormal(Some(3), "boom").ready().await;
        assert_eq!(outcome, ExitOutcome::abnormal(Some(3), "boom"));
        assert!(!outcome.is_success());
        assert_eq!(outcome.diagnostic(), Some("boom"));
    }

    #[test]
    fn test_timed_out_is_not_success() {
        let outcome = ExitOutcome::timed_out("killed at the deadline");
        assert!(!outcome.is_success());
        assert_eq!(outcome.diagnostic(), Some("killed at the deadline"));
        assert_eq!(ExitOutcome::Success.diagnostic(), None);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);
        drop(rx);
        let err = sink.emit(&ProtocolMessage::TestStart { name: "a".to_string() }).unwrap_err();
        assert!(matches!(err, EngineError::SinkClosed(_)));
    }
}
