//! Property tests for the result protocol codec and capability rendering.
//!
//! These lock in the two invariants the orchestrator relies on: every message survives a trip over the wire, and
//! no two distinct capability sets share a rendering.

use permatrix_core::protocol::{decode, encode};
use permatrix_core::{CapabilitySet, EndSummary, ProtocolMessage, TestStatus};
use proptest::prelude::*;

fn status() -> impl Strategy<Value = TestStatus> {
    prop_oneof![
        Just(TestStatus::Passed),
        Just(TestStatus::Failed),
        Just(TestStatus::Ignored),
    ]
}

fn message() -> impl Strategy<Value = ProtocolMessage> {
    prop_oneof![
        prop::collection::vec(any::<String>(), 0..8).prop_map(|tests| ProtocolMessage::Start { tests }),
        any::<String>().prop_map(|name| ProtocolMessage::TestStart { name }),
        (any::<String>(), status(), proptest::option::of(any::<String>()))
            .prop_map(|(name, result, error)| ProtocolMessage::TestEnd { name, result, error }),
        (any::<u32>(), any::<u32>(), any::<u32>(), any::<u64>()).prop_map(|(passed, failed, ignored, duration)| {
            ProtocolMessage::End(EndSummary {
                passed: u64::from(passed),
                failed: u64::from(failed),
                ignored: u64::from(ignored),
                duration_millis: duration,
            })
        }),
    ]
}

fn capability_set() -> impl Strategy<Value = CapabilitySet> {
    (0usize..128).prop_map(|i| CapabilitySet::all_combinations()[i])
}

proptest! {
    /// Property: decode(encode(m)) == m
    #[test]
    fn codec_round_trips(msg in message()) {
        let line = encode(&msg);
        prop_assert!(line.ends_with('\n'));
        prop_assert_eq!(line.matches('\n').count(), 1, "encoded line must be self-delimited: {:?}", line);
        prop_assert_eq!(decode(&line).unwrap(), msg);
    }

    /// Property: distinct sets never render identically
    #[test]
    fn format_is_injective(a in capability_set(), b in capability_set()) {
        if a != b {
            prop_assert_ne!(a.format(), b.format());
        } else {
            prop_assert_eq!(a.format(), b.format());
        }
    }

    /// Property: the rendered form is also the argument form
    #[test]
    fn format_parses_back(set in capability_set()) {
        prop_assert_eq!(set.format().parse::<CapabilitySet>().unwrap(), set);
    }
}
