//! Console reporting for a sweep.

use std::io::{self, Write};

use permatrix_core::CapabilitySet;
use permatrix_core::protocol::{ProtocolMessage, TestStatus};

use super::MatrixReport;
use crate::collector::{RunFailure, RunVerdict};
use crate::context::ExitOutcome;

const GREEN: &str = "32";
const RED: &str = "31";
const YELLOW: &str = "33";
const BOLD: &str = "1";

/// Trait for reporting sweep progress and results.
///
/// Implement this trait to customize output (JSON, CI annotations, etc.).
pub trait MatrixReporter {
    /// Called once before the first run
    fn on_sweep_start(&mut self, _sets: &[CapabilitySet], _strategy: &str) {}

    /// Called before a capability set's run is started
    fn on_run_start(&mut self, capabilities: &CapabilitySet);

    /// Called for every decoded message, as it arrives
    fn on_message(&mut self, capabilities: &CapabilitySet, message: &ProtocolMessage);

    /// Called once a run's verdict is known
    fn on_verdict(&mut self, _verdict: &RunVerdict) {}

    /// Called after every capability set has run
    fn on_sweep_complete(&mut self, report: &MatrixReport);
}

/// Default console reporter.
///
/// Lines are written unbuffered as they are produced so a human watching sees progress live.
pub struct ConsoleReporter<W: Write = io::Stdout> {
    out: W,
    color: bool,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout(color: bool) -> Self {
        Self::new(io::stdout(), color)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn line(&mut self, text: &str) {
        // Console output is best effort; a closed stdout must not fail the sweep.
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl<W: Write> MatrixReporter for ConsoleReporter<W> {
    fn on_sweep_start(&mut self, sets: &[CapabilitySet], strategy: &str) {
        let text = format!("running {} capability set(s) with the {} strategy", sets.len(), strategy);
        self.line(&text);
    }

    fn on_run_start(&mut self, capabilities: &CapabilitySet) {
        let heading = self.paint(BOLD, &format!("=================== {} ===================", capabilities));
        self.line("");
        self.line(&heading);
    }

    fn on_message(&mut self, _capabilities: &CapabilitySet, message: &ProtocolMessage) {
        let text = match message {
            ProtocolMessage::Start { tests } => format!("running {} test(s)", tests.len()),
            ProtocolMessage::TestStart { name } => format!("test {name} ..."),
            ProtocolMessage::TestEnd { name, result, error } => {
                let status = match result {
                    TestStatus::Passed => self.paint(GREEN, "ok"),
                    TestStatus::Failed => self.paint(RED, "FAILED"),
                    TestStatus::Ignored => self.paint(YELLOW, "ignored"),
                };
                let mut text = format!("test {name} ... {status}");
                if let Some(error) = error {
                    for line in error.lines() {
                        text.push_str("\n    ");
                        text.push_str(line);
                    }
                }
                text
            }
            ProtocolMessage::End(summary) => {
                let status = if summary.failed == 0 {
                    self.paint(GREEN, "ok")
                } else {
                    self.paint(RED, "FAILED")
                };
                format!(
                    "result: {status}. {} passed; {} failed; {} ignored; finished in {}ms",
                    summary.passed, summary.failed, summary.ignored, summary.duration_millis
                )
            }
        };
        self.line(&text);
    }

    fn on_verdict(&mut self, verdict: &RunVerdict) {
        if let Some(failure) = &verdict.failure {
            let text = self.paint(RED, &format!("{}: {}", verdict.rendered, failure));
            self.line(&text);
        }
    }

    fn on_sweep_complete(&mut self, report: &MatrixReport) {
        self.line("");
        let title = self.paint(BOLD, "=================== summary ===================");
        self.line(&title);
        for verdict in &report.verdicts {
            for (i, text) in verdict_lines(verdict).into_iter().enumerate() {
                let text = match (i, verdict.passed) {
                    (0, true) => self.paint(GREEN, &text),
                    (0, false) => self.paint(RED, &text),
                    _ => text,
                };
                self.line(&text);
            }
        }

        let failed = report.failures().count();
        let passed = report.verdicts.len() - failed;
        let totals = format!(
            "=================== {} passed, {} failed in {:.2}s ===================",
            passed,
            failed,
            report.duration.as_secs_f64()
        );
        let (totals, outcome) = if report.passed() {
            (self.paint(GREEN, &totals), self.paint(GREEN, "passed"))
        } else {
            (self.paint(RED, &totals), self.paint(RED, "failed"))
        };
        self.line(&totals);
        self.line(&outcome);
    }
}

/// Summary lines for one verdict: the status line, then indented detail.
pub fn verdict_lines(verdict: &RunVerdict) -> Vec<String> {
    let Some(failure) = &verdict.failure else {
        let counts = verdict
            .summary
            .map(|s| format!(" ({} passed, {} ignored)", s.passed, s.ignored))
            .unwrap_or_default();
        return vec![format!("ok      {}{}", verdict.rendered, counts)];
    };

    let mut lines = vec![format!("FAILED  {}: {}", verdict.rendered, failure)];
    for test in &verdict.failed_tests {
        match &test.error {
            Some(error) => lines.push(format!("        {} failed: {}", test.name, error.lines().next().unwrap_or(""))),
            None => lines.push(format!("        {} failed", test.name)),
        }
    }
    if let Some(diagnostic) = verdict.exit.diagnostic() {
        if !matches!(failure, RunFailure::ProcessAbend { .. }) {
            lines.push(format!("        exit: {diagnostic}"));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::FailedTest;
    use permatrix_core::Capability;
    use permatrix_core::protocol::EndSummary;
    use std::time::Duration;

    fn verdict(capabilities: CapabilitySet, failure: Option<RunFailure>) -> RunVerdict {
        RunVerdict {
            capabilities,
            rendered: capabilities.format(),
            declared: Some(2),
            summary: Some(EndSummary {
                passed: 2,
                ..EndSummary::default()
            }),
            failed_tests: Vec::new(),
            exit: ExitOutcome::Success,
            passed: failure.is_none(),
            failure,
        }
    }

    #[test]
    fn test_summary_names_the_failing_set() {
        let read = CapabilitySet::from_grants([Capability::Read]);
        let mut crashed = verdict(read.with(Capability::Write), Some(RunFailure::MissingEnd { declared: 3, reported: 1 }));
        crashed.summary = None;
        crashed.exit = ExitOutcome::abnormal(Some(101), "process exit status: 101");
        let mut mismatched = verdict(CapabilitySet::none(), None);
        mismatched.failure = Some(RunFailure::CountMismatch {
            declared: 2,
            completed: 1,
            failed: 1,
        });
        mismatched.passed = false;
        mismatched.failed_tests = vec![FailedTest {
            name: "denies_write".into(),
            error: Some("expected denial\nmore detail".into()),
        }];

        let report = MatrixReport {
            verdicts: vec![verdict(read, None), crashed, mismatched],
            duration: Duration::from_millis(1500),
        };
        let mut reporter = ConsoleReporter::new(Vec::new(), false);
        reporter.on_sweep_complete(&report);
        let output = String::from_utf8(reporter.into_inner()).unwrap();

        insta::assert_snapshot!(output.trim(), @r"
        =================== summary ===================
        ok      read (2 passed, 0 ignored)
        FAILED  read,write: missing end: the run stopped after reporting 1 of 3 tests
                exit: process exit status: 101
        FAILED  none: count mismatch: declared 2 tests, completed 1 (1 failed)
                denies_write failed: expected denial
        =================== 1 passed, 2 failed in 1.50s ===================
        failed
        ");
    }

    #[test]
    fn test_progress_lines() {
        let mut reporter = ConsoleReporter::new(Vec::new(), false);
        let caps = CapabilitySet::none();
        reporter.on_message(&caps, &ProtocolMessage::Start { tests: vec!["a".into()] });
        reporter.on_message(
            &caps,
            &ProtocolMessage::TestEnd {
                name: "a".into(),
                result: TestStatus::Failed,
                error: Some("boom".into()),
            },
        );
        let output = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(output, "running 1 test(s)\ntest a ... FAILED\n    boom\n");
    }
}
