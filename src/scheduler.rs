//! Grouping of mutants into shared test runs
//!
//! Mutants whose covering tests never overlap can be active in the same test
//! session: each test activates at most one of them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mutant::{Mutant, MutantId, TestId, TestSet};

/// Switches for the test-saving optimizations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationFlags {
    /// Run each mutant only against the tests that reach it
    pub coverage_based_test: bool,
    /// Never put two mutants in the same session
    pub disable_test_mix: bool,
    /// Stop a session once every mutant in it has a verdict
    pub abort_test_on_kill: bool,
}

impl Default for OptimizationFlags {
    fn default() -> Self {
        Self {
            coverage_based_test: true,
            disable_test_mix: false,
            abort_test_on_kill: true,
        }
    }
}

/// Mutants tested together in one session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestGroup {
    pub mutants: Vec<MutantId>,
}

impl TestGroup {
    pub fn single(id: MutantId) -> Self {
        Self { mutants: vec![id] }
    }

    pub fn len(&self) -> usize {
        self.mutants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutants.is_empty()
    }

    pub fn contains(&self, id: MutantId) -> bool {
        self.mutants.contains(&id)
    }
}

/// Partition `mutants` into groups with pairwise-disjoint covering tests
pub fn build_groups(mutants: &[Mutant], flags: &OptimizationFlags) -> Vec<TestGroup> {
    if !flags.coverage_based_test || flags.disable_test_mix {
        return mutants.iter().map(|m| TestGroup::single(m.id)).collect();
    }

    let mut groups = Vec::new();
    let mut pool: Vec<(MutantId, &BTreeSet<TestId>)> = Vec::new();
    for mutant in mutants {
        match &mutant.covering_tests {
            // an empty list would read as "every test" in the session document
            TestSet::Only(tests) if !mutant.must_run_against_all_tests && !tests.is_empty() => {
                pool.push((mutant.id, tests));
            }
            _ => groups.push(TestGroup::single(mutant.id)),
        }
    }
    let isolated = groups.len();

    // stable: equal counts keep their input order
    pool.sort_by(|(_, a), (_, b)| b.len().cmp(&a.len()));
    let total_tests = pool
        .iter()
        .flat_map(|(_, tests)| tests.iter())
        .collect::<BTreeSet<_>>()
        .len();

    let mut grouped = vec![false; pool.len()];
    for anchor in 0..pool.len() {
        if grouped[anchor] {
            continue;
        }
        grouped[anchor] = true;
        let (id, tests) = pool[anchor];
        let mut group = TestGroup::single(id);
        let mut used: BTreeSet<&TestId> = tests.iter().collect();

        for candidate in anchor + 1..pool.len() {
            if grouped[candidate] {
                continue;
            }
            let (id, tests) = pool[candidate];
            let fits = tests.len() + used.len() <= total_tests;
            if fits && !tests.iter().any(|test| used.contains(test)) {
                grouped[candidate] = true;
                group.mutants.push(id);
                used.extend(tests.iter());
            }
        }
        groups.push(group);
    }

    debug!(
        mutants = mutants.len(),
        groups = groups.len(),
        isolated,
        "built test groups"
    );
    groups
}
