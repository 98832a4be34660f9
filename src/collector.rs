//! Reconciling collector: turns one run's message stream into a verdict.
//!
//! The verdict is decided by reconciling counts, not by looking for failed tests. A run declares its tests up front
//! (`start`) and summarises them at the end (`end`); it passes only if every declared test completed
//! (`passed + ignored`). A run that crashed partway never reports the missing tests at all, so this catches silent
//! partial failures that a "did any test fail" check would miss.
//!
//! ## Failure precedence
//!
//! 1. protocol violation or timeout (detected while reading, or reported by the context),
//! 2. missing `start`,
//! 3. missing `end`,
//! 4. abnormal exit of the execution unit (overrides an otherwise consistent stream),
//! 5. count mismatch.

use std::future::Future;
use std::time::Duration;

use permatrix_core::CapabilitySet;
use permatrix_core::protocol::{EndSummary, ProtocolError, ProtocolMessage, TestStatus};
use thiserror::Error;
use tokio::time::Instant;

use crate::context::{ExitOutcome, RunHandle};

/// How long a timed-out run gets to exit before it is torn down.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunFailure {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("missing start: the run never declared its tests")]
    MissingStart,

    #[error("missing end: the run stopped after reporting {reported} of {declared} tests")]
    MissingEnd { declared: u64, reported: u64 },

    #[error("process abend: {diagnostic}")]
    ProcessAbend { code: Option<i32>, diagnostic: String },

    #[error("count mismatch: declared {declared} tests, completed {completed} ({failed} failed)")]
    CountMismatch { declared: u64, completed: u64, failed: u64 },

    #[error("timed out after {}s waiting for the run", after.as_secs())]
    TimedOut { after: Duration },
}

/// A test that reported `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTest {
    pub name: String,
    pub error: Option<String>,
}

/// Outcome record for one capability set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunVerdict {
    pub capabilities: CapabilitySet,
    /// Human-readable rendering of `capabilities`.
    pub rendered: String,
    /// Number of tests declared by `start`, if it was seen.
    pub declared: Option<u64>,
    /// The terminal `end` summary, if it was seen.
    pub summary: Option<EndSummary>,
    pub failed_tests: Vec<FailedTest>,
    pub exit: ExitOutcome,
    pub passed: bool,
    pub failure: Option<RunFailure>,
}

/// Consumes one run's stream and decides its verdict.
#[derive(Debug, Clone)]
pub struct ReconcilingCollector {
    capabilities: CapabilitySet,
    timeout: Option<Duration>,
    started: Option<Instant>,
}

impl ReconcilingCollector {
    pub fn new(capabilities: CapabilitySet) -> Self {
        Self {
            capabilities,
            timeout: None,
            started: None,
        }
    }

    /// Bound the whole run (every message wait plus the exit wait).
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Count the timeout from `started` instead of from the start of collection.
    ///
    /// Pass the instant the context was started with, so time spent bringing the run up is part of the same budget.
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = Some(started);
        self
    }

    /// The run's deadline, if it has a timeout.
    pub fn deadline(&self) -> Option<Instant> {
        let started = self.started.unwrap_or_else(Instant::now);
        self.timeout.map(|t| started + t)
    }

    /// Drain `handle`, calling `observe` for every decoded message as it arrives, and tear the run down.
    #[tracing::instrument(skip_all, fields(capabilities = %self.capabilities))]
    pub async fn collect(self, handle: RunHandle, mut observe: impl FnMut(&ProtocolMessage)) -> RunVerdict {
        let RunHandle { mut messages, exit } = handle;
        let deadline = self.deadline();

        let mut declared: Option<u64> = None;
        let mut reported: u64 = 0;
        let mut summary: Option<EndSummary> = None;
        let mut failed_tests = Vec::new();
        let mut failure: Option<RunFailure> = None;

        loop {
            let Some(next) = until(deadline, messages.next()).await else {
                failure = Some(self.timed_out());
                break;
            };
            let message = match next {
                None => break,
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    failure = Some(RunFailure::Protocol(e.to_string()));
                    break;
                }
            };
            tracing::debug!(kind = message.kind(), "message received");
            observe(&message);

            match message {
                ProtocolMessage::Start { tests } => {
                    if declared.is_some() {
                        failure = Some(RunFailure::Protocol(ProtocolError::DuplicateStart.to_string()));
                        break;
                    }
                    declared = Some(tests.len() as u64);
                }
                ProtocolMessage::TestStart { .. } | ProtocolMessage::TestEnd { .. } | ProtocolMessage::End(_)
                    if declared.is_none() =>
                {
                    let event = message.kind();
                    failure = Some(RunFailure::Protocol(ProtocolError::EventBeforeStart { event }.to_string()));
                    break;
                }
                ProtocolMessage::TestStart { .. } => {}
                ProtocolMessage::TestEnd { name, result, error } => {
                    reported += 1;
                    if result == TestStatus::Failed {
                        failed_tests.push(FailedTest { name, error });
                    }
                }
                ProtocolMessage::End(end) => {
                    // Nothing after `end` is read.
                    summary = Some(end);
                    break;
                }
            }
        }

        // Close the connection/channel before waiting, so a unit blocked on reporting can finish.
        messages.close();
        drop(messages);

        let exit_deadline = match failure {
            Some(RunFailure::TimedOut { .. }) => Some(Instant::now() + EXIT_GRACE),
            _ => deadline,
        };
        let exit = match until(exit_deadline, exit).await {
            Some(outcome) => outcome,
            None => {
                // Dropping the exit future kills a spawned process.
                failure.get_or_insert_with(|| self.timed_out());
                ExitOutcome::timed_out("still running at the deadline; torn down")
            }
        };

        let failure = failure
            .or_else(|| matches!(exit, ExitOutcome::TimedOut { .. }).then(|| self.timed_out()))
            .or_else(|| declared.is_none().then_some(RunFailure::MissingStart))
            .or_else(|| {
                summary.is_none().then(|| RunFailure::MissingEnd {
                    declared: declared.unwrap_or_default(),
                    reported,
                })
            })
            .or_else(|| match &exit {
                ExitOutcome::Abnormal { code, diagnostic } => Some(RunFailure::ProcessAbend {
                    code: *code,
                    diagnostic: diagnostic.clone(),
                }),
                ExitOutcome::Success | ExitOutcome::TimedOut { .. } => None,
            })
            .or_else(|| {
                let declared = declared.unwrap_or_default();
                let end = summary.unwrap_or_default();
                (declared != end.completed()).then_some(RunFailure::CountMismatch {
                    declared,
                    completed: end.completed(),
                    failed: end.failed,
                })
            });

        let verdict = RunVerdict {
            capabilities: self.capabilities,
            rendered: self.capabilities.format(),
            declared,
            summary,
            failed_tests,
            exit,
            passed: failure.is_none(),
            failure,
        };
        match &verdict.failure {
            None => tracing::info!(capabilities = %verdict.rendered, "run passed"),
            Some(failure) => tracing::warn!(capabilities = %verdict.rendered, %failure, "run failed"),
        }
        verdict
    }

    fn timed_out(&self) -> RunFailure {
        RunFailure::TimedOut {
            after: self.timeout.unwrap_or_default(),
        }
    }
}

/// Await `fut`, giving up (`None`) at `deadline`.
async fn until<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MessageStream;
    use permatrix_core::protocol::encode;
    use std::io::Cursor;

    fn handle(messages: &[ProtocolMessage], exit: ExitOutcome) -> RunHandle {
        let bytes: String = messages.iter().map(encode).collect();
        RunHandle::new(MessageStream::from_reader(Cursor::new(bytes.into_bytes())), exit.ready())
    }

    #[tokio::test]
    async fn test_observer_sees_messages_up_to_end() {
        let messages = vec![
            ProtocolMessage::Start { tests: vec!["a".into()] },
            ProtocolMessage::TestEnd {
                name: "a".into(),
                result: TestStatus::Passed,
                error: None,
            },
            ProtocolMessage::End(EndSummary {
                passed: 1,
                ..EndSummary::default()
            }),
            ProtocolMessage::TestStart { name: "late".into() },
        ];
        let mut seen = Vec::new();
        let verdict = ReconcilingCollector::new(CapabilitySet::none())
            .collect(handle(&messages, ExitOutcome::Success), |m| seen.push(m.kind()))
            .await;

        assert!(verdict.passed);
        assert_eq!(seen, vec!["start", "testEnd", "end"]);
    }

    #[tokio::test]
    async fn test_event_before_start_is_a_protocol_violation() {
        let messages = vec![ProtocolMessage::TestStart { name: "a".into() }];
        let verdict = ReconcilingCollector::new(CapabilitySet::none())
            .collect(handle(&messages, ExitOutcome::Success), |_| {})
            .await;

        assert_eq!(
            verdict.failure,
            Some(RunFailure::Protocol("'testStart' message received before start".to_string()))
        );
    }

    #[tokio::test]
    async fn test_end_before_start_is_a_protocol_violation() {
        let messages = vec![ProtocolMessage::End(EndSummary::default())];
        let verdict = ReconcilingCollector::new(CapabilitySet::none())
            .collect(handle(&messages, ExitOutcome::Success), |_| {})
            .await;

        assert_eq!(
            verdict.failure,
            Some(RunFailure::Protocol("'end' message received before start".to_string()))
        );
        assert!(verdict.summary.is_none());
    }

    #[tokio::test]
    async fn test_context_timeout_outranks_missing_start() {
        let verdict = ReconcilingCollector::new(CapabilitySet::none())
            .with_timeout(Some(Duration::from_secs(4)))
            .collect(handle(&[], ExitOutcome::timed_out("never connected")), |_| {})
            .await;

        assert_eq!(
            verdict.failure,
            Some(RunFailure::TimedOut {
                after: Duration::from_secs(4)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_from_start() {
        let started = Instant::now();
        tokio::time::advance(Duration::from_secs(3)).await;
        let collector = ReconcilingCollector::new(CapabilitySet::none())
            .with_timeout(Some(Duration::from_secs(5)))
            .started_at(started);

        assert_eq!(collector.deadline(), Some(started + Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_failed_tests_are_recorded() {
        let messages = vec![
            ProtocolMessage::Start {
                tests: vec!["a".into(), "b".into()],
            },
            ProtocolMessage::TestEnd {
                name: "a".into(),
                result: TestStatus::Failed,
                error: Some("expected 1".into()),
            },
            ProtocolMessage::TestEnd {
                name: "b".into(),
                result: TestStatus::Ignored,
                error: None,
            },
            ProtocolMessage::End(EndSummary {
                failed: 1,
                ignored: 1,
                ..EndSummary::default()
            }),
        ];
        let verdict = ReconcilingCollector::new(CapabilitySet::none())
            .collect(handle(&messages, ExitOutcome::Success), |_| {})
            .await;

        assert_eq!(
            verdict.failure,
            Some(RunFailure::CountMismatch {
                declared: 2,
                completed: 1,
                failed: 1,
            })
        );
        assert_eq!(
            verdict.failed_tests,
            vec![FailedTest {
                name: "a".into(),
                error: Some("expected 1".into()),
            }]
        );
    }
}
