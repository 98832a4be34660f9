//! Test registration.
//!
//! Every test declares the exact capability set it must run under. A sweep derives its combinations from those
//! declarations, and a restricted run only selects the tests whose declaration matches the run's set.

use permatrix_core::CapabilitySet;
use permatrix_core::capability::distinct_in_order;

use crate::TestContext;

/// Result of a test body: `Err` carries the failure message.
pub type TestOutcome = Result<(), String>;

/// A test body.
pub type TestFn = fn(&TestContext) -> TestOutcome;

/// A registered test.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub capabilities: CapabilitySet,
    pub ignore: bool,
    pub body: TestFn,
}

/// Ordered registry of tests.
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    tests: Vec<TestCase>,
}

impl TestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test that runs under `capabilities`.
    pub fn test(mut self, name: impl Into<String>, capabilities: CapabilitySet, body: TestFn) -> Self {
        self.tests.push(TestCase {
            name: name.into(),
            capabilities,
            ignore: false,
            body,
        });
        self
    }

    /// Register a test that is reported as ignored without running.
    pub fn ignored(mut self, name: impl Into<String>, capabilities: CapabilitySet, body: TestFn) -> Self {
        self.tests.push(TestCase {
            name: name.into(),
            capabilities,
            ignore: true,
            body,
        });
        self
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Distinct declared capability sets, in registration order.
    pub fn capability_combinations(&self) -> Vec<CapabilitySet> {
        distinct_in_order(self.tests.iter().map(|t| t.capabilities))
    }

    /// Tests that run under exactly `capabilities` and whose name contains `filter`.
    pub fn select(&self, capabilities: &CapabilitySet, filter: Option<&str>) -> Vec<&TestCase> {
        self.tests
            .iter()
            .filter(|t| t.capabilities == *capabilities)
            .filter(|t| filter.is_none_or(|f| t.name.contains(f)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permatrix_core::Capability;

    fn ok(_: &TestContext) -> TestOutcome {
        Ok(())
    }

    fn sample() -> TestSuite {
        let read = CapabilitySet::from_grants([Capability::Read]);
        TestSuite::new()
            .test("read_file", read, ok)
            .test("no_access", CapabilitySet::none(), ok)
            .ignored("read_dir", read, ok)
            .test("read_link", read, ok)
    }

    #[test]
    fn test_combinations_follow_registration_order() {
        let suite = sample();
        assert_eq!(
            suite.capability_combinations(),
            vec![CapabilitySet::from_grants([Capability::Read]), CapabilitySet::none()]
        );
    }

    #[test]
    fn test_select_by_capabilities_and_filter() {
        let suite = sample();
        let read = CapabilitySet::from_grants([Capability::Read]);

        let names: Vec<_> = suite.select(&read, None).iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", "read_dir", "read_link"]);

        let names: Vec<_> = suite.select(&read, Some("li")).iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_link"]);

        assert!(suite.select(&CapabilitySet::all(), None).is_empty());
    }
}
