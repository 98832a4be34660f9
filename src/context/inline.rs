//! In-process execution with no isolation boundary.

use std::sync::Arc;

use permatrix_core::CapabilitySet;
use permatrix_testing::{TestContext, TestSuite, run_suite};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ChannelSink, ContextError, ExecutionContext, ExitOutcome, MessageStream, RunHandle};

/// Runs the engine directly on the calling task.
///
/// The whole run completes inside [`start`](ExecutionContext::start); the returned stream replays what it
/// reported. Only meant for the host-permissions mode, which is not part of a sweep.
pub struct InlineContext {
    suite: Arc<TestSuite>,
    host: CapabilitySet,
}

impl InlineContext {
    pub fn new(suite: Arc<TestSuite>, host: CapabilitySet) -> Self {
        Self { suite, host }
    }
}

impl ExecutionContext for InlineContext {
    fn name(&self) -> &'static str {
        "inline"
    }

    /// The deadline cannot interrupt an inline run; it is only enforced on the replayed stream.
    async fn start(
        &mut self,
        capabilities: &CapabilitySet,
        filter: Option<&str>,
        _deadline: Option<Instant>,
    ) -> Result<RunHandle, ContextError> {
        let ctx = TestContext::restricted(&self.host, capabilities)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);

        let exit = match run_suite(&self.suite, &ctx, filter, &mut sink) {
            Ok(_) => ExitOutcome::Success,
            Err(e) => ExitOutcome::abnormal(None, format!("inline run stopped: {e}")),
        };
        drop(sink);

        Ok(RunHandle::new(MessageStream::from_channel(rx), exit.ready()))
    }
}
