//! Coverage capture and the mutant → covering tests map

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::error::{MutationError, Result};
use crate::mutant::{Mutant, MutantId, MutantStatus, TestId, TestSet};
use crate::runner::TestExecutor;

/// Sent instead of an empty string, which transports reject
pub const EMPTY_PAYLOAD: &str = " ";

const LIST_DELIMITER: char = ';';

/// Guard ids one test reached, as flushed by the collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoveragePayload {
    /// Reached while no mutant was selected
    pub reached: Vec<MutantId>,
    /// Reached while a mutant was selected
    pub reached_while_active: Vec<MutantId>,
}

impl CoveragePayload {
    pub fn is_empty(&self) -> bool {
        self.reached.is_empty() && self.reached_while_active.is_empty()
    }

    /// `"1,2;3"`, or a single space when nothing was reached
    pub fn encode(&self) -> String {
        if self.is_empty() {
            return EMPTY_PAYLOAD.to_string();
        }
        format!(
            "{}{LIST_DELIMITER}{}",
            join_ids(&self.reached),
            join_ids(&self.reached_while_active)
        )
    }

    pub fn parse(payload: &str) -> Result<Self> {
        if payload.trim().is_empty() {
            return Ok(Self::default());
        }
        let (reached, active) =
            payload
                .split_once(LIST_DELIMITER)
                .ok_or_else(|| MutationError::InvalidPayload {
                    payload: payload.to_string(),
                    reason: format!("missing '{LIST_DELIMITER}' delimiter"),
                })?;
        Ok(Self {
            reached: parse_ids(payload, reached)?,
            reached_while_active: parse_ids(payload, active)?,
        })
    }

    /// Every reached id, from both lists
    pub fn ids(&self) -> impl Iterator<Item = MutantId> + '_ {
        self.reached
            .iter()
            .chain(&self.reached_while_active)
            .copied()
    }
}

fn join_ids(ids: &[MutantId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_ids(payload: &str, list: &str) -> Result<Vec<MutantId>> {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse().map_err(|_| MutationError::InvalidPayload {
                payload: payload.to_string(),
                reason: format!("'{id}' is not a mutant id"),
            })
        })
        .collect()
}

/// Coverage reported for one test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCoverage {
    pub test_id: TestId,
    /// `None` when the collector sent nothing for this test
    pub payload: Option<String>,
}

impl TestCoverage {
    pub fn new(test_id: impl Into<TestId>, payload: Option<String>) -> Self {
        Self {
            test_id: test_id.into(),
            payload,
        }
    }
}

/// Result of one coverage pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageMap {
    pub by_mutant: BTreeMap<MutantId, BTreeSet<TestId>>,
    /// Every test that took part in the pass
    pub tests: BTreeSet<TestId>,
    /// Tests whose coverage never arrived or could not be read
    pub tests_without_data: BTreeSet<TestId>,
}

impl CoverageMap {
    /// Invert per-test reached lists into per-mutant covering sets
    pub fn from_records(records: &[TestCoverage]) -> Self {
        let mut map = CoverageMap::default();
        for record in records {
            map.tests.insert(record.test_id.clone());
            let parsed = match record.payload.as_deref().map(CoveragePayload::parse) {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => {
                    warn!(test = %record.test_id, error = %e, "unreadable coverage payload");
                    map.tests_without_data.insert(record.test_id.clone());
                    continue;
                }
                None => {
                    map.tests_without_data.insert(record.test_id.clone());
                    continue;
                }
            };
            for id in parsed.ids() {
                map.by_mutant
                    .entry(id)
                    .or_default()
                    .insert(record.test_id.clone());
            }
        }
        if !map.tests_without_data.is_empty() {
            warn!(
                tests = map.tests_without_data.len(),
                "some tests reported no coverage; they will run against every mutant"
            );
        }
        map
    }

    /// Tests known to reach the guard of `id`
    pub fn covering(&self, id: MutantId) -> BTreeSet<TestId> {
        let mut tests = self.by_mutant.get(&id).cloned().unwrap_or_default();
        tests.extend(self.tests_without_data.iter().cloned());
        tests
    }

    /// Store covering sets on the mutants; uncovered ones become `Ignored`
    pub fn apply(&self, mutants: &mut [Mutant]) {
        for mutant in mutants.iter_mut().filter(|m| m.status == MutantStatus::NotRun) {
            if mutant.must_run_against_all_tests {
                mutant.covering_tests = TestSet::Everything;
                continue;
            }
            let tests = self.covering(mutant.id);
            if tests.is_empty() {
                mutant.covering_tests = TestSet::default();
                mutant.finalize(
                    MutantStatus::Ignored,
                    Some("not covered by any test".to_string()),
                );
            } else {
                mutant.covering_tests = TestSet::Only(tests);
            }
        }
    }
}

/// Every mutant runs against the whole suite
pub fn skip_coverage(mutants: &mut [Mutant]) {
    for mutant in mutants.iter_mut().filter(|m| m.status == MutantStatus::NotRun) {
        mutant.covering_tests = TestSet::Everything;
    }
}

/// Drives the single coverage-capturing pass
pub struct CoverageAnalyser<'a, E: TestExecutor + ?Sized> {
    executor: &'a E,
}

impl<'a, E: TestExecutor + ?Sized> CoverageAnalyser<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    pub fn determine_coverage(&self, mutants: &mut [Mutant]) -> Result<CoverageMap> {
        let records = self.executor.capture_coverage()?;
        let map = CoverageMap::from_records(&records);
        map.apply(mutants);

        let ignored = mutants
            .iter()
            .filter(|m| m.status == MutantStatus::Ignored)
            .count();
        info!(
            tests = map.tests.len(),
            covered = map.by_mutant.len(),
            ignored,
            "coverage determined"
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutant::tests::mutant;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_encoding() {
        let payload = CoveragePayload {
            reached: vec![1, 2],
            reached_while_active: vec![3],
        };
        assert_eq!(payload.encode(), "1,2;3");
        assert_eq!(CoveragePayload::parse("1,2;3").unwrap(), payload);

        assert_eq!(CoveragePayload::default().encode(), " ");
        assert!(CoveragePayload::parse(" ").unwrap().is_empty());

        let idle_only = CoveragePayload::parse("4;").unwrap();
        assert_eq!(idle_only.reached, vec![4]);
        assert!(idle_only.reached_while_active.is_empty());
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        assert!(matches!(
            CoveragePayload::parse("1,2"),
            Err(MutationError::InvalidPayload { .. })
        ));
        assert!(matches!(
            CoveragePayload::parse("1,x;"),
            Err(MutationError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_inversion_matches_reached_lists() {
        let records = vec![
            TestCoverage::new("t1", Some("0,1;".to_string())),
            TestCoverage::new("t2", Some("1;2".to_string())),
            TestCoverage::new("t3", Some(" ".to_string())),
        ];
        let map = CoverageMap::from_records(&records);

        let expected: BTreeMap<MutantId, BTreeSet<TestId>> = BTreeMap::from([
            (0, BTreeSet::from(["t1".to_string()])),
            (1, BTreeSet::from(["t1".to_string(), "t2".to_string()])),
            (2, BTreeSet::from(["t2".to_string()])),
        ]);
        assert_eq!(map.by_mutant, expected);
        assert_eq!(map.tests.len(), 3);
        assert!(map.tests_without_data.is_empty());
    }

    #[test]
    fn test_apply_ignores_uncovered_and_widens_must_run() {
        let records = vec![TestCoverage::new("t1", Some("0;".to_string()))];
        let map = CoverageMap::from_records(&records);

        let mut mutants = vec![
            mutant(0, TestSet::default()),
            mutant(1, TestSet::default()),
            mutant(2, TestSet::default()),
        ];
        mutants[2].must_run_against_all_tests = true;
        map.apply(&mut mutants);

        assert_eq!(mutants[0].covering_tests, TestSet::from_ids(["t1"]));
        assert_eq!(mutants[1].status, MutantStatus::Ignored);
        assert_eq!(
            mutants[1].status_reason.as_deref(),
            Some("not covered by any test")
        );
        assert_eq!(mutants[2].covering_tests, TestSet::Everything);
        assert_eq!(mutants[2].status, MutantStatus::NotRun);
    }

    #[test]
    fn test_missing_data_covers_every_mutant() {
        let records = vec![
            TestCoverage::new("t1", Some("0;".to_string())),
            TestCoverage::new("t2", None),
        ];
        let map = CoverageMap::from_records(&records);
        assert!(map.tests_without_data.contains("t2"));

        let mut mutants = vec![mutant(0, TestSet::default()), mutant(1, TestSet::default())];
        map.apply(&mut mutants);
        assert_eq!(mutants[0].covering_tests, TestSet::from_ids(["t1", "t2"]));
        assert_eq!(mutants[1].covering_tests, TestSet::from_ids(["t2"]));
        assert_eq!(mutants[1].status, MutantStatus::NotRun);
    }
}
