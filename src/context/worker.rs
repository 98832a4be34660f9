//! Isolated worker execution inside the orchestrator process.

use std::sync::Arc;
use std::thread;

use permatrix_core::CapabilitySet;
use permatrix_testing::{TerminateHandle, TestContext, TestSuite, run_suite_until};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::{ChannelSink, ContextError, ExecutionContext, ExitOutcome, MessageStream, RunHandle};

/// Runs each restricted run on its own dedicated, detached thread.
///
/// The worker owns a [`TestContext`] narrowed before the thread starts and reports through an unbounded channel.
/// Teardown is cooperative:
/// - once the collector has seen `end` it drops the receiving side, so a worker that kept talking fails its next send;
/// - dropping the run's exit future (the collector does this at the deadline) requests termination, which the engine
///   honours before its next test.
///
/// A test body that never returns keeps its thread alive, but nothing waits for that thread: the sweep moves on and
/// the runtime can shut down.
pub struct WorkerContext {
    suite: Arc<TestSuite>,
    host: CapabilitySet,
}

impl WorkerContext {
    pub fn new(suite: Arc<TestSuite>, host: CapabilitySet) -> Self {
        Self { suite, host }
    }
}

/// Requests termination when the exit future holding it is dropped.
struct TerminateOnDrop(TerminateHandle);

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        self.0.terminate();
    }
}

impl ExecutionContext for WorkerContext {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn start(
        &mut self,
        capabilities: &CapabilitySet,
        filter: Option<&str>,
        _deadline: Option<Instant>,
    ) -> Result<RunHandle, ContextError> {
        let ctx = TestContext::restricted(&self.host, capabilities)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let suite = Arc::clone(&self.suite);
        let filter = filter.map(str::to_owned);
        let terminate = TerminateHandle::new();
        let worker_terminate = terminate.clone();

        thread::Builder::new()
            .name(format!("permatrix-worker[{capabilities}]"))
            .spawn(move || {
                let mut sink = ChannelSink::new(tx);
                let result = run_suite_until(&suite, &ctx, filter.as_deref(), &mut sink, &worker_terminate);
                // Nobody may be waiting any more.
                let _ = done_tx.send(result);
            })
            .map_err(ContextError::Thread)?;
        tracing::debug!(capabilities = %capabilities, "worker started");

        let guard = TerminateOnDrop(terminate);
        let exit = Box::pin(async move {
            let _guard = guard;
            match done_rx.await {
                Ok(Ok(_)) => ExitOutcome::Success,
                Ok(Err(e)) => ExitOutcome::abnormal(None, format!("worker stopped: {e}")),
                // The sender only goes away unsent when the thread unwound.
                Err(_) => ExitOutcome::abnormal(None, "worker panicked"),
            }
        });

        Ok(RunHandle::new(MessageStream::from_channel(rx), exit))
    }
}
