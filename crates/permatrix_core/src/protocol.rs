//! Line-delimited result protocol.
//!
//! One JSON object per line, restricted worker → orchestrator only:
//!
//! ```text
//! {"start":{"tests":["a","b"]}}
//! {"testStart":{"name":"a"}}
//! {"testEnd":{"name":"a","result":"passed","error":null}}
//! {"end":{"passed":1,"failed":0,"ignored":0,"duration":12}}
//! ```
//!
//! ## Notes
//!
//! - [`encode`] always produces exactly one line terminated by `\n`; string payloads are JSON-escaped, so an embedded
//!   newline can never split a message.
//! - [`decode`] accepts a line with or without its terminator. Anything that does not parse into a
//!   [`ProtocolMessage`] is a [`ProtocolError`]; callers treat it as fatal for the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a single protocol line, terminator included.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Outcome of a single test as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Ignored,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Ignored => "ignored",
        }
    }
}

/// Terminal summary of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndSummary {
    pub passed: u64,
    pub failed: u64,
    pub ignored: u64,
    /// Wall-clock duration in milliseconds.
    #[serde(rename = "duration")]
    pub duration_millis: u64,
}

impl EndSummary {
    /// Tests that reached a non-failing outcome (`passed + ignored`).
    pub fn completed(&self) -> u64 {
        self.passed.saturating_add(self.ignored)
    }
}

/// One event in a run's result stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolMessage {
    /// Declares exactly which tests will run, in run order.
    Start { tests: Vec<String> },
    TestStart { name: String },
    TestEnd {
        name: String,
        result: TestStatus,
        #[serde(default)]
        error: Option<String>,
    },
    End(EndSummary),
}

impl ProtocolMessage {
    /// Short tag used in diagnostics (matches the wire key).
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::Start { .. } => "start",
            ProtocolMessage::TestStart { .. } => "testStart",
            ProtocolMessage::TestEnd { .. } => "testEnd",
            ProtocolMessage::End(_) => "end",
        }
    }
}

/// Errors raised while reading the result stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed protocol line {line:?}: {reason}")]
    Malformed { line: String, reason: String },

    #[error("stream ended in the middle of a line: {partial:?}")]
    Truncated { partial: String },

    #[error("protocol line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("duplicate start message")]
    DuplicateStart,

    #[error("'{event}' message received before start")]
    EventBeforeStart { event: &'static str },

    #[error("I/O error while reading results: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a message as one newline-terminated line.
pub fn encode(message: &ProtocolMessage) -> String {
    // Serializing these types cannot fail: every key is a string and there are no maps with non-string keys.
    let mut line = serde_json::to_string(message).unwrap_or_default();
    line.push('\n');
    line
}

/// Decode one line (terminator optional) into a message.
///
/// ## Errors
///
/// Returns [`ProtocolError::Malformed`] for anything that is not exactly one protocol object.
pub fn decode(line: &str) -> Result<ProtocolMessage, ProtocolError> {
    let trimmed = line.strip_suffix('\n').unwrap_or(line);
    let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Malformed {
        line: trimmed.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_start() {
        let msg = ProtocolMessage::Start {
            tests: vec!["a".to_string(), "b".to_string()],
        };
        insta::assert_snapshot!(encode(&msg).trim_end(), @r#"{"start":{"tests":["a","b"]}}"#);
    }

    #[test]
    fn test_encode_test_end_with_null_error() {
        let msg = ProtocolMessage::TestEnd {
            name: "reads_env".to_string(),
            result: TestStatus::Passed,
            error: None,
        };
        insta::assert_snapshot!(
            encode(&msg).trim_end(),
            @r#"{"testEnd":{"name":"reads_env","result":"passed","error":null}}"#
        );
    }

    #[test]
    fn test_encode_end() {
        let msg = ProtocolMessage::End(EndSummary {
            passed: 3,
            failed: 1,
            ignored: 0,
            duration_millis: 42,
        });
        insta::assert_snapshot!(
            encode(&msg).trim_end(),
            @r#"{"end":{"passed":3,"failed":1,"ignored":0,"duration":42}}"#
        );
    }

    #[test]
    fn test_encode_escapes_newlines() {
        let msg = ProtocolMessage::TestEnd {
            name: "multi".to_string(),
            result: TestStatus::Failed,
            error: Some("line one\nline two".to_string()),
        };
        let line = encode(&msg);
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_decode_accepts_missing_error_field() {
        let msg = decode(r#"{"testEnd":{"name":"x","result":"ignored"}}"#).unwrap();
        assert_eq!(
            msg,
            ProtocolMessage::TestEnd {
                name: "x".to_string(),
                result: TestStatus::Ignored,
                error: None,
            }
        );
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let msg = decode("{\"testStart\":{\"name\":\"x\"}}\r\n").unwrap();
        assert_eq!(msg, ProtocolMessage::TestStart { name: "x".to_string() });
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("hello"), Err(ProtocolError::Malformed { .. })));
        assert!(matches!(decode(""), Err(ProtocolError::Malformed { .. })));
        assert!(matches!(decode(r#"{"start":{"tests":["a""#), Err(ProtocolError::Malformed { .. })));
        assert!(matches!(decode(r#"{"finish":{}}"#), Err(ProtocolError::Malformed { .. })));
        assert!(matches!(
            decode(r#"{"testEnd":{"name":"x","result":"exploded"}}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_completed_counts_passed_and_ignored() {
        let summary = EndSummary {
            passed: 2,
            failed: 5,
            ignored: 1,
            duration_millis: 0,
        };
        assert_eq!(summary.completed(), 3);
    }
}
