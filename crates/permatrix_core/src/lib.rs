//! Shared vocabulary for the permatrix orchestrator and its restricted workers.
//!
//! This crate is intentionally small and dependency-light. It holds the two things both sides of the result
//! protocol must agree on byte-for-byte:
//! - [`capability`]: capability names, immutable capability sets and their canonical rendering, and
//! - [`protocol`]: the result messages and their newline-delimited JSON codec.
//!
//! ## Notes
//!
//! - **No IO** and no global state. Reading sockets, pipes and channels is the orchestrator's job.

pub mod capability;
pub mod protocol;

pub use capability::{Capability, CapabilityError, CapabilitySet};
pub use protocol::{EndSummary, ProtocolError, ProtocolMessage, TestStatus};
