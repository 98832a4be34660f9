//! Test execution and event emission.
//!
//! [`run_suite`] is the whole engine: it selects the tests for one restricted run, announces them with a `start`
//! message, runs them in order and closes with an `end` summary. Every event goes through an [`EventSink`], which
//! is how the same engine feeds a socket, a pipe or an in-process channel.
//!
//! A run can be stopped from outside with a [`TerminateHandle`]. The request is honoured between tests; a test body
//! that is already running is never interrupted.

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use permatrix_core::protocol::{self, EndSummary, ProtocolMessage, TestStatus};
use thiserror::Error;

use crate::{TestContext, TestSuite};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("result sink closed: {0}")]
    SinkClosed(String),

    #[error("I/O error while reporting results: {0}")]
    Io(#[from] std::io::Error),

    #[error("run terminated after {completed} of {selected} tests")]
    Terminated { completed: usize, selected: usize },
}

/// Shared stop request for one run.
///
/// Clones observe the same flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct TerminateHandle {
    flag: Arc<AtomicBool>,
}

impl TerminateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop before its next test.
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Destination for protocol messages.
pub trait EventSink {
    fn emit(&mut self, message: &ProtocolMessage) -> Result<(), EngineError>;
}

/// Writes each message as one encoded line and flushes immediately.
pub struct LineSink<W: Write> {
    writer: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for LineSink<W> {
    fn emit(&mut self, message: &ProtocolMessage) -> Result<(), EngineError> {
        self.writer.write_all(protocol::encode(message).as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

impl EventSink for Vec<ProtocolMessage> {
    fn emit(&mut self, message: &ProtocolMessage) -> Result<(), EngineError> {
        self.push(message.clone());
        Ok(())
    }
}

/// Run the tests `ctx` selects from `suite` and report them to `sink`.
///
/// Returns the emitted end summary.
///
/// ## Errors
///
/// Fails only if the sink rejects a message; test failures are reported, not returned.
pub fn run_suite(
    suite: &TestSuite,
    ctx: &TestContext,
    filter: Option<&str>,
    sink: &mut dyn EventSink,
) -> Result<EndSummary, EngineError> {
    run_suite_until(suite, ctx, filter, sink, &TerminateHandle::new())
}

/// Like [`run_suite`], but checks `terminate` before every test.
///
/// ## Errors
///
/// Returns [`EngineError::Terminated`] without emitting `end` once termination was requested.
#[tracing::instrument(skip_all, fields(capabilities = %ctx.capabilities()))]
pub fn run_suite_until(
    suite: &TestSuite,
    ctx: &TestContext,
    filter: Option<&str>,
    sink: &mut dyn EventSink,
    terminate: &TerminateHandle,
) -> Result<EndSummary, EngineError> {
    let started = Instant::now();
    let selected = suite.select(&ctx.capabilities(), filter);
    let total = selected.len();

    sink.emit(&ProtocolMessage::Start {
        tests: selected.iter().map(|t| t.name.clone()).collect(),
    })?;

    let mut summary = EndSummary::default();
    for (completed, test) in selected.into_iter().enumerate() {
        if terminate.is_terminated() {
            tracing::debug!(completed, "termination requested");
            return Err(EngineError::Terminated {
                completed,
                selected: total,
            });
        }
        sink.emit(&ProtocolMessage::TestStart { name: test.name.clone() })?;

        let (result, error) = if test.ignore {
            (TestStatus::Ignored, None)
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| (test.body)(ctx))) {
                Ok(Ok(())) => (TestStatus::Passed, None),
                Ok(Err(msg)) => (TestStatus::Failed, Some(msg)),
                Err(payload) => (TestStatus::Failed, Some(panic_message(payload.as_ref()))),
            }
        };

        match result {
            TestStatus::Passed => summary.passed += 1,
            TestStatus::Failed => summary.failed += 1,
            TestStatus::Ignored => summary.ignored += 1,
        }
        tracing::debug!(test = %test.name, result = result.as_str(), "test finished");

        sink.emit(&ProtocolMessage::TestEnd {
            name: test.name.clone(),
            result,
            error,
        })?;
    }

    summary.duration_millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    sink.emit(&ProtocolMessage::End(summary))?;
    Ok(summary)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
