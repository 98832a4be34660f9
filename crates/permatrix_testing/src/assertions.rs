//! Assertion helpers for test bodies.
//!
//! Unlike `assert!`, these return a [`TestOutcome`] so a failed check is reported with its message instead of
//! unwinding. Use them with `?`:
//!
//! ```rust
//! use permatrix_testing::assertions::{assert_eq, assert_true};
//! use permatrix_testing::TestOutcome;
//!
//! fn body() -> TestOutcome {
//!     assert_eq(2 + 2, 4)?;
//!     assert_true(true, "always")
//! }
//! assert!(body().is_ok());
//! ```

use std::fmt::Debug;

use crate::TestOutcome;

/// Fail with `msg` unless `condition` holds.
pub fn assert_true(condition: bool, msg: &str) -> TestOutcome {
    if condition { Ok(()) } else { fail(msg) }
}

/// Fail with `msg` if `condition` holds.
pub fn assert_false(condition: bool, msg: &str) -> TestOutcome {
    assert_true(!condition, msg)
}

/// Fail unless `left == right`.
pub fn assert_eq<T: PartialEq + Debug>(left: T, right: T) -> TestOutcome {
    if left == right {
        Ok(())
    } else {
        Err(format!(
            "assertion failed: left != right\n  left:  {:?}\n  right: {:?}",
            left, right
        ))
    }
}

/// Fail unless `left != right`.
pub fn assert_ne<T: PartialEq + Debug>(left: T, right: T) -> TestOutcome {
    if left != right {
        Ok(())
    } else {
        Err(format!(
            "assertion failed: left == right\n  left:  {:?}\n  right: {:?}",
            left, right
        ))
    }
}

/// Explicitly fail with a message.
pub fn fail(msg: &str) -> TestOutcome {
    Err(msg.to_string())
}
