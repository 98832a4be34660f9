//! Capabilities and immutable capability sets.
//!
//! A [`CapabilitySet`] is one combination of boolean access rights. It is a `Copy` value (a bitset over the fixed
//! [`Capability`] enumeration), so equality, hashing and ordering come for free and a set can be used directly as a
//! map key.
//!
//! ## Notes
//!
//! - Variants of [`Capability`] are declared in ascending order of their canonical names, so iterating in declaration
//!   order *is* the sorted order used by [`CapabilitySet::format`].
//! - The empty set renders as [`NO_CAPABILITIES`], which is never a capability name; rendering is therefore injective.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Rendering of the empty capability set.
pub const NO_CAPABILITIES: &str = "none";

/// Separator between capability names in the rendered form.
pub const SEPARATOR: char = ',';

/// One access right that a restricted run may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Environment,
    HighResTimer,
    Network,
    Plugin,
    Read,
    Subprocess,
    Write,
}

impl Capability {
    /// Every capability, in canonical (sorted) order.
    pub const ALL: [Capability; 7] = [
        Capability::Environment,
        Capability::HighResTimer,
        Capability::Network,
        Capability::Plugin,
        Capability::Read,
        Capability::Subprocess,
        Capability::Write,
    ];

    /// Canonical name used for display and process arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Environment => "environment",
            Capability::HighResTimer => "high-res-timer",
            Capability::Network => "network",
            Capability::Plugin => "plugin",
            Capability::Read => "read",
            Capability::Subprocess => "subprocess",
            Capability::Write => "write",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|cap| cap.as_str() == s)
            .ok_or_else(|| CapabilityError::UnknownCapability(s.to_string()))
    }
}

/// Errors raised while parsing or narrowing capability sets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("capability set '{requested}' widens the host set '{host}'")]
    Widening {
        host: CapabilitySet,
        requested: CapabilitySet,
    },
}

/// An immutable combination of granted capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CapabilitySet {
    bits: u8,
}

impl CapabilitySet {
    /// The set granting nothing.
    pub const fn none() -> Self {
        Self { bits: 0 }
    }

    /// The set granting every capability.
    pub fn all() -> Self {
        Self::from_grants(Capability::ALL)
    }

    /// Build a set from the capabilities that should be granted.
    pub fn from_grants(grants: impl IntoIterator<Item = Capability>) -> Self {
        let bits = grants.into_iter().fold(0, |acc, cap| acc | cap.bit());
        Self { bits }
    }

    /// Return a copy of this set that also grants `cap`.
    #[must_use]
    pub fn with(self, cap: Capability) -> Self {
        Self {
            bits: self.bits | cap.bit(),
        }
    }

    /// Whether `cap` is granted.
    pub fn grants(&self, cap: Capability) -> bool {
        self.bits & cap.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Whether every capability granted here is also granted by `other`.
    pub fn is_subset_of(&self, other: &CapabilitySet) -> bool {
        self.bits & !other.bits == 0
    }

    /// Granted capabilities in canonical order.
    pub fn to_grant_list(&self) -> Vec<Capability> {
        Capability::ALL.into_iter().filter(|cap| self.grants(*cap)).collect()
    }

    /// Deterministic rendering: sorted granted names joined by [`SEPARATOR`], or [`NO_CAPABILITIES`].
    ///
    /// The same string is used for log lines, console output and the restricted worker's `--grant` argument; it parses
    /// back with [`FromStr`].
    pub fn format(&self) -> String {
        if self.is_empty() {
            return NO_CAPABILITIES.to_string();
        }
        self.to_grant_list()
            .iter()
            .map(|cap| cap.as_str())
            .collect::<Vec<_>>()
            .join(&SEPARATOR.to_string())
    }

    /// Restrict `host` to `requested`.
    ///
    /// ## Errors
    ///
    /// Returns [`CapabilityError::Widening`] if `requested` grants anything `host` does not. Narrowing never widens.
    pub fn narrow(host: &CapabilitySet, requested: &CapabilitySet) -> Result<CapabilitySet, CapabilityError> {
        if requested.is_subset_of(host) {
            Ok(*requested)
        } else {
            Err(CapabilityError::Widening {
                host: *host,
                requested: *requested,
            })
        }
    }

    /// Every possible combination, in ascending bit order (starting with the empty set).
    pub fn all_combinations() -> Vec<CapabilitySet> {
        let count = 1u16 << Capability::ALL.len();
        (0..count).map(|bits| CapabilitySet { bits: bits as u8 }).collect()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl FromStr for CapabilitySet {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == NO_CAPABILITIES {
            return Ok(CapabilitySet::none());
        }
        s.split(SEPARATOR)
            .map(|name| name.trim().parse::<Capability>())
            .collect::<Result<Vec<_>, _>>()
            .map(CapabilitySet::from_grants)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        CapabilitySet::from_grants(iter)
    }
}

/// Distinct capability sets in first-seen order.
///
/// This is how a sweep's combinations are derived from registered tests: every test declares the set it needs, and
/// each distinct set gets one restricted run.
pub fn distinct_in_order(sets: impl IntoIterator<Item = CapabilitySet>) -> Vec<CapabilitySet> {
    let mut seen: Vec<CapabilitySet> = Vec::new();
    for set in sets {
        if !seen.contains(&set) {
            seen.push(set);
        }
    }
    seen
}
