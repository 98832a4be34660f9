//! The restricted permission state seen by test bodies.
//!
//! A [`TestContext`] is created once, at the start of a restricted run, *before* any test is selected or executed.
//! It is never mutated afterwards. Test bodies ask it for access with [`TestContext::require`].

use permatrix_core::{Capability, CapabilityError, CapabilitySet};
use thiserror::Error;

/// Access to a capability the current run was not granted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("permission denied: '{capability}' is not granted (granted: {granted})")]
pub struct PermissionDenied {
    pub capability: Capability,
    pub granted: CapabilitySet,
}

/// Capability state for one restricted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestContext {
    capabilities: CapabilitySet,
}

impl TestContext {
    /// Narrow `host` to `requested` and freeze the result.
    ///
    /// ## Errors
    ///
    /// Returns [`CapabilityError::Widening`] if `requested` asks for anything `host` lacks.
    pub fn restricted(host: &CapabilitySet, requested: &CapabilitySet) -> Result<Self, CapabilityError> {
        let capabilities = CapabilitySet::narrow(host, requested)?;
        tracing::debug!(capabilities = %capabilities, "capabilities applied");
        Ok(Self { capabilities })
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Check that `capability` is granted.
    pub fn require(&self, capability: Capability) -> Result<(), PermissionDenied> {
        if self.capabilities.grants(capability) {
            Ok(())
        } else {
            Err(PermissionDenied {
                capability,
                granted: self.capabilities,
            })
        }
    }

    /// Read an environment variable, gated on [`Capability::Environment`].
    pub fn env_var(&self, key: &str) -> Result<Option<String>, PermissionDenied> {
        self.require(Capability::Environment)?;
        Ok(std::env::var(key).ok())
    }
}
