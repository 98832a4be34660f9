//! Minimal test engine driven by the permatrix orchestrator.
//!
//! The orchestrator does not care how tests are written; it only needs something that
//! 1. accepts a frozen [`TestContext`] before anything runs,
//! 2. selects the tests declared for that context's capability set, and
//! 3. reports them through the result protocol.
//!
//! That is all this crate provides: [`TestSuite`] for registration, [`run_suite`] for execution, and a few
//! [`assertions`] for bodies.

pub mod assertions;
pub mod context;
pub mod engine;
pub mod suite;

pub use context::{PermissionDenied, TestContext};
pub use engine::{EngineError, EventSink, LineSink, TerminateHandle, run_suite, run_suite_until};
pub use suite::{TestCase, TestFn, TestOutcome, TestSuite};
