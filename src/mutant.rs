//! Mutants, their covering tests and status transitions

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Dense per-run mutant identifier
pub type MutantId = u32;

/// Identifier of a test case as reported by the test executor
pub type TestId = String;

/// Status of a mutant
///
/// A mutant leaves `NotRun` exactly once; every other state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutantStatus {
    /// Not tested yet
    NotRun,
    /// A covering test failed (good!)
    Killed,
    /// Every covering test passed (bad!)
    Survived,
    /// The batch or a covering test timed out
    Timeout,
    /// The compilation unit holding the mutant failed to build
    CompileError,
    /// No test can reach the mutant
    Ignored,
    /// The group finished before all covering tests reported
    Incomplete,
}

impl MutantStatus {
    pub fn is_terminal(self) -> bool {
        self != MutantStatus::NotRun
    }
}

/// Family of the rewrite that produced a mutant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutatorKind {
    Arithmetic,
    Boundary,
    Equality,
    Logical,
    Bitwise,
    Assignment,
    Boolean,
    Negation,
    String,
    Statement,
    /// Entry from the mutations config file
    Configured,
}

/// Source span of a mutation site (1-indexed lines and columns)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Location {
    pub fn from_span(span: proc_macro2::Span) -> Self {
        let start = span.start();
        let end = span.end();
        Self {
            line: start.line,
            column: start.column + 1,
            end_line: end.line,
            end_column: end.column + 1,
        }
    }
}

/// Set of tests, either explicit or the whole suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestSet {
    Everything,
    Only(BTreeSet<TestId>),
}

impl Default for TestSet {
    fn default() -> Self {
        TestSet::Only(BTreeSet::new())
    }
}

impl TestSet {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TestId>,
    {
        TestSet::Only(ids.into_iter().map(Into::into).collect())
    }

    pub fn is_everything(&self) -> bool {
        matches!(self, TestSet::Everything)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TestSet::Only(ids) if ids.is_empty())
    }

    pub fn contains(&self, test: &str) -> bool {
        match self {
            TestSet::Everything => true,
            TestSet::Only(ids) => ids.contains(test),
        }
    }

    /// True when the two sets share at least one test
    pub fn contains_any(&self, other: &TestSet) -> bool {
        match (self, other) {
            (TestSet::Everything, set) | (set, TestSet::Everything) => !set.is_empty(),
            (TestSet::Only(a), TestSet::Only(b)) => a.iter().any(|t| b.contains(t)),
        }
    }

    /// True when every test of `other` is in `self`
    pub fn contains_all(&self, other: &TestSet) -> bool {
        match (self, other) {
            (TestSet::Everything, _) => true,
            (TestSet::Only(_), TestSet::Everything) => false,
            (TestSet::Only(a), TestSet::Only(b)) => b.is_subset(a),
        }
    }

    /// Tests present in both sets, as explicit ids
    pub fn intersection(&self, other: &TestSet) -> BTreeSet<TestId> {
        match (self, other) {
            (TestSet::Everything, TestSet::Everything) => BTreeSet::new(),
            (TestSet::Everything, TestSet::Only(ids)) | (TestSet::Only(ids), TestSet::Everything) => {
                ids.clone()
            }
            (TestSet::Only(a), TestSet::Only(b)) => a.intersection(b).cloned().collect(),
        }
    }

    pub fn extend<I: IntoIterator<Item = TestId>>(&mut self, tests: I) {
        if let TestSet::Only(ids) = self {
            ids.extend(tests);
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &TestId> {
        let ids = match self {
            TestSet::Everything => None,
            TestSet::Only(ids) => Some(ids.iter()),
        };
        ids.into_iter().flatten()
    }
}

/// A single mutant placed in the source tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutant {
    pub id: MutantId,
    pub file: PathBuf,
    pub function: Option<String>,
    pub location: Location,
    pub original: String,
    pub replacement: String,
    pub kind: MutatorKind,
    pub description: String,
    /// Set when coverage cannot be scoped to individual tests
    pub must_run_against_all_tests: bool,
    pub covering_tests: TestSet,
    /// Covering tests that failed while this mutant was active
    #[serde(default)]
    pub killing_tests: BTreeSet<TestId>,
    pub status: MutantStatus,
    #[serde(default)]
    pub status_reason: Option<String>,
}

impl Mutant {
    pub fn display_name(&self) -> String {
        format!(
            "{}: {} -> {} ({}:{})",
            self.id,
            self.original,
            self.replacement,
            self.file.display(),
            self.location.line
        )
    }

    /// Move out of `NotRun`; returns false (and changes nothing) when already terminal
    pub fn finalize(&mut self, status: MutantStatus, reason: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.status_reason = reason;
        true
    }

    /// Fold one batch report into the status; returns true if the status changed
    pub fn analyze_test_run(
        &mut self,
        failed: &TestSet,
        ran: &TestSet,
        timed_out: &TestSet,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if failed.contains_any(&self.covering_tests) {
            self.killing_tests = failed.intersection(&self.covering_tests);
            return self.finalize(MutantStatus::Killed, None);
        }
        if timed_out.contains_any(&self.covering_tests) {
            return self.finalize(MutantStatus::Timeout, None);
        }
        if ran.contains_all(&self.covering_tests) {
            return self.finalize(MutantStatus::Survived, None);
        }
        false
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mutant(id: MutantId, covering: TestSet) -> Mutant {
        Mutant {
            id,
            file: PathBuf::from("src/lib.rs"),
            function: Some("f".to_string()),
            location: Location::default(),
            original: "a + b".to_string(),
            replacement: "a - b".to_string(),
            kind: MutatorKind::Arithmetic,
            description: "arithmetic".to_string(),
            must_run_against_all_tests: false,
            covering_tests: covering,
            killing_tests: BTreeSet::new(),
            status: MutantStatus::NotRun,
            status_reason: None,
        }
    }

    #[test]
    fn test_killed_when_covering_test_fails() {
        let mut m = mutant(7, TestSet::from_ids(["t1"]));
        let changed = m.analyze_test_run(
            &TestSet::from_ids(["t1"]),
            &TestSet::from_ids(["t1"]),
            &TestSet::default(),
        );
        assert!(changed);
        assert_eq!(m.status, MutantStatus::Killed);
        assert!(m.killing_tests.contains("t1"));
    }

    #[test]
    fn test_failure_of_other_test_does_not_kill() {
        let mut m = mutant(1, TestSet::from_ids(["t1", "t2"]));
        m.analyze_test_run(
            &TestSet::from_ids(["t9"]),
            &TestSet::from_ids(["t1", "t9"]),
            &TestSet::default(),
        );
        assert_eq!(m.status, MutantStatus::NotRun);

        m.analyze_test_run(
            &TestSet::default(),
            &TestSet::from_ids(["t2"]),
            &TestSet::default(),
        );
        // t1 only reported in the earlier batch, so t2 alone is not enough
        assert_eq!(m.status, MutantStatus::NotRun);

        m.analyze_test_run(
            &TestSet::default(),
            &TestSet::from_ids(["t1", "t2"]),
            &TestSet::default(),
        );
        assert_eq!(m.status, MutantStatus::Survived);
    }

    #[test]
    fn test_timeout_attribution() {
        let mut m = mutant(2, TestSet::from_ids(["t1"]));
        m.analyze_test_run(
            &TestSet::default(),
            &TestSet::from_ids(["t1"]),
            &TestSet::from_ids(["t1"]),
        );
        assert_eq!(m.status, MutantStatus::Timeout);
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut m = mutant(3, TestSet::from_ids(["t1"]));
        m.analyze_test_run(
            &TestSet::default(),
            &TestSet::from_ids(["t1"]),
            &TestSet::default(),
        );
        assert_eq!(m.status, MutantStatus::Survived);

        // a late failure report must not flip a finalized mutant
        let changed = m.analyze_test_run(
            &TestSet::from_ids(["t1"]),
            &TestSet::from_ids(["t1"]),
            &TestSet::default(),
        );
        assert!(!changed);
        assert_eq!(m.status, MutantStatus::Survived);
        assert!(!m.finalize(MutantStatus::Incomplete, None));
        assert_eq!(m.status, MutantStatus::Survived);
    }

    #[test]
    fn test_everything_requires_whole_suite() {
        let mut m = mutant(4, TestSet::Everything);
        m.analyze_test_run(
            &TestSet::default(),
            &TestSet::from_ids(["t1", "t2"]),
            &TestSet::default(),
        );
        assert_eq!(m.status, MutantStatus::NotRun);

        m.analyze_test_run(&TestSet::default(), &TestSet::Everything, &TestSet::default());
        assert_eq!(m.status, MutantStatus::Survived);

        let mut killed = mutant(5, TestSet::Everything);
        killed.analyze_test_run(
            &TestSet::from_ids(["t2"]),
            &TestSet::from_ids(["t2"]),
            &TestSet::default(),
        );
        assert_eq!(killed.status, MutantStatus::Killed);
    }

    #[test]
    fn test_set_operations() {
        let a = TestSet::from_ids(["1", "2"]);
        let b = TestSet::from_ids(["3"]);
        assert!(!a.contains_any(&b));
        assert!(a.contains_any(&TestSet::Everything));
        assert!(!TestSet::default().contains_any(&TestSet::Everything));
        assert!(TestSet::Everything.contains_all(&a));
        assert!(!a.contains_all(&TestSet::Everything));
        assert!(TestSet::default().is_empty());
        assert!(!TestSet::Everything.is_empty());
    }
}
