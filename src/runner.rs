//! Test execution coordinator
//!
//! This module runs scheduled test groups:
//! - Hands each group to the test executor as one batch
//! - Folds the executor's partial reports into mutant statuses
//! - Applies abort-on-kill, timeout, trace and cancellation policies

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::collector::SessionConfig;
use crate::coverage::TestCoverage;
use crate::error::{MutationError, Result};
use crate::mutant::{Mutant, MutantId, MutantStatus, TestSet};
use crate::report::Reporter;
use crate::scheduler::{OptimizationFlags, TestGroup};

/// Mutants to activate in one test session, with their covering tests
#[derive(Debug, Clone, PartialEq)]
pub struct TestBatch {
    pub mutants: BTreeMap<MutantId, TestSet>,
    pub control_surface: String,
    pub trace: Option<BTreeSet<MutantId>>,
}

impl TestBatch {
    pub fn new(mutants: &[Mutant], control_surface: &str, trace: Option<&BTreeSet<MutantId>>) -> Self {
        Self {
            mutants: mutants
                .iter()
                .map(|m| (m.id, m.covering_tests.clone()))
                .collect(),
            control_surface: control_surface.to_string(),
            trace: trace.cloned(),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = MutantId> + '_ {
        self.mutants.keys().copied()
    }

    /// Tests that must run for every mutant of the batch to get a verdict
    pub fn tests(&self) -> TestSet {
        let mut tests = TestSet::default();
        for covering in self.mutants.values() {
            if covering.is_everything() {
                return TestSet::Everything;
            }
            tests.extend(covering.ids().cloned());
        }
        tests
    }

    /// Document handed to the in-process collector
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            false,
            Some(&self.mutants),
            &self.control_surface,
            self.trace.as_ref(),
        )
    }
}

/// Partial results reported while a batch runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchUpdate {
    pub tested_mutants: Vec<MutantId>,
    pub failed: TestSet,
    pub ran: TestSet,
    pub timed_out: TestSet,
}

/// How a batch finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEnd {
    Completed,
    /// The whole batch ran out of time
    TimedOut,
}

/// Runs tests in the instrumented program
pub trait TestExecutor: Sync {
    /// One full pass with coverage capture on
    fn capture_coverage(&self) -> Result<Vec<TestCoverage>>;

    /// Run a batch; `on_update` returns false to stop the batch early
    fn test(
        &self,
        batch: &TestBatch,
        timeout: Duration,
        on_update: &mut dyn FnMut(&BatchUpdate) -> bool,
    ) -> Result<BatchEnd>;
}

/// Batch timeout: a base plus an allowance per mutant in the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub base: Duration,
    pub per_mutant: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            per_mutant: Duration::ZERO,
        }
    }
}

impl TimeoutPolicy {
    pub fn for_batch(&self, mutants: usize) -> Duration {
        let count = u32::try_from(mutants).unwrap_or(u32::MAX);
        self.base
            .saturating_add(self.per_mutant.saturating_mul(count))
    }
}

/// Cooperative cancellation shared between the caller and the workers
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_parallelism: usize,
    pub optimizations: OptimizationFlags,
    pub traced_mutants: Option<BTreeSet<MutantId>>,
    /// With tracing, run only the traced mutants instead of their whole groups
    pub dev_mode: bool,
    pub timeout: TimeoutPolicy,
    pub control_surface: String,
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallelism: 1,
            optimizations: OptimizationFlags::default(),
            traced_mutants: None,
            dev_mode: false,
            timeout: TimeoutPolicy::default(),
            control_surface: crate::DEFAULT_CONTROL_SURFACE.to_string(),
            cancel: CancelToken::new(),
        }
    }
}

/// Groups actually run once the trace override is applied
fn select_traced(groups: &[TestGroup], options: &RunOptions) -> Vec<TestGroup> {
    let Some(traced) = &options.traced_mutants else {
        return groups.to_vec();
    };
    if options.dev_mode {
        groups
            .iter()
            .map(|group| TestGroup {
                mutants: group
                    .mutants
                    .iter()
                    .copied()
                    .filter(|id| traced.contains(id))
                    .collect(),
            })
            .filter(|group| !group.is_empty())
            .collect()
    } else {
        groups
            .iter()
            .filter(|group| group.mutants.iter().any(|id| traced.contains(id)))
            .cloned()
            .collect()
    }
}

/// Run every group and return all mutants, sorted by id
///
/// Mutants that belong to no selected group are returned unchanged.
pub fn run_groups<E: TestExecutor + ?Sized>(
    mutants: Vec<Mutant>,
    groups: &[TestGroup],
    executor: &E,
    options: &RunOptions,
    reporter: &dyn Reporter,
) -> Result<Vec<Mutant>> {
    if let Some(mutant) = mutants.iter().find(|m| m.status != MutantStatus::NotRun) {
        return Err(MutationError::InvariantViolation {
            mutant: mutant.id,
            status: mutant.status,
        });
    }

    let groups = select_traced(groups, options);
    let mut idle: BTreeMap<MutantId, Mutant> = mutants.into_iter().map(|m| (m.id, m)).collect();
    let work: Vec<Vec<Mutant>> = groups
        .iter()
        .map(|group| {
            group
                .mutants
                .iter()
                .filter_map(|id| idle.remove(id))
                .collect::<Vec<_>>()
        })
        .filter(|group| !group.is_empty())
        .collect();

    info!(
        groups = work.len(),
        mutants = work.iter().map(Vec::len).sum::<usize>(),
        workers = options.max_parallelism.max(1),
        "testing mutants"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.max_parallelism.max(1))
        .build()
        .map_err(|e| MutationError::TestExecutionError {
            error: format!("cannot start worker pool: {e}"),
        })?;
    let tested: Vec<Vec<Mutant>> = pool.install(|| {
        work.into_par_iter()
            .map(|group| run_group(group, executor, options, reporter))
            .collect()
    });

    let mut all: Vec<Mutant> = idle
        .into_values()
        .chain(tested.into_iter().flatten())
        .collect();
    all.sort_by_key(|m| m.id);
    Ok(all)
}

fn run_group<E: TestExecutor + ?Sized>(
    mut group: Vec<Mutant>,
    executor: &E,
    options: &RunOptions,
    reporter: &dyn Reporter,
) -> Vec<Mutant> {
    if options.cancel.is_cancelled() {
        return group;
    }

    let batch = TestBatch::new(&group, &options.control_surface, options.traced_mutants.as_ref());
    let timeout = options.timeout.for_batch(group.len());
    let abort_on_kill = options.optimizations.abort_test_on_kill;

    let outcome = executor.test(&batch, timeout, &mut |update: &BatchUpdate| {
        for mutant in group
            .iter_mut()
            .filter(|m| update.tested_mutants.contains(&m.id))
        {
            if mutant.analyze_test_run(&update.failed, &update.ran, &update.timed_out) {
                debug!(mutant = mutant.id, status = ?mutant.status, "mutant tested");
                reporter.on_mutant_tested(mutant);
            }
        }
        if options.cancel.is_cancelled() {
            return false;
        }
        !(abort_on_kill && group.iter().all(|m| m.status.is_terminal()))
    });

    match outcome {
        Ok(BatchEnd::Completed) => {}
        Ok(BatchEnd::TimedOut) => {
            finalize_rest(&mut group, MutantStatus::Timeout, "batch timed out", reporter);
        }
        Err(e) => {
            error!(mutants = ?batch.ids().collect::<Vec<_>>(), error = %e, "test batch failed");
            finalize_rest(&mut group, MutantStatus::Incomplete, &e.to_string(), reporter);
        }
    }

    if options.cancel.is_cancelled() {
        return group;
    }
    for mutant in group.iter().filter(|m| m.status == MutantStatus::NotRun) {
        warn!(mutant = mutant.id, "mutant was not fully tested");
    }
    finalize_rest(&mut group, MutantStatus::Incomplete, "not fully tested", reporter);
    group
}

fn finalize_rest(group: &mut [Mutant], status: MutantStatus, reason: &str, reporter: &dyn Reporter) {
    for mutant in group.iter_mut() {
        if mutant.finalize(status, Some(reason.to_string())) {
            reporter.on_mutant_tested(mutant);
        }
    }
}
