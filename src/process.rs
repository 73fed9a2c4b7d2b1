//! Mutation test process
//!
//! Drives one run end to end: place mutants, determine coverage, schedule
//! the remaining mutants into groups and test them.

use std::path::Path;

use tracing::{info, warn};

use crate::codegen::{self, InstrumentedSource};
use crate::coverage::{self, CoverageAnalyser, CoverageMap};
use crate::error::{MutationError, Result};
use crate::mutant::{Mutant, MutantStatus};
use crate::placement::PlacementEngine;
use crate::report::Reporter;
use crate::runner::{run_groups, RunOptions, TestExecutor};
use crate::scheduler::build_groups;

#[derive(Debug)]
enum CoverageState {
    Pending,
    Skipped,
    Determined(CoverageMap),
}

pub struct MutationTestProcess<E: TestExecutor> {
    engine: PlacementEngine,
    executor: E,
    options: RunOptions,
    mutants: Vec<Mutant>,
    coverage: CoverageState,
}

impl<E: TestExecutor> MutationTestProcess<E> {
    pub fn new(engine: PlacementEngine, executor: E, options: RunOptions) -> Self {
        Self {
            engine,
            executor,
            options,
            mutants: Vec::new(),
            coverage: CoverageState::Pending,
        }
    }

    pub fn mutants(&self) -> &[Mutant] {
        &self.mutants
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Instrument one source file and register its mutants
    ///
    /// Pass the control surface name for the crate root.
    pub fn mutate(&mut self, path: &Path, source: &str, surface: Option<&str>) -> Result<InstrumentedSource> {
        let instrumented = codegen::instrument_source(&mut self.engine, path, source, surface)?;
        self.mutants
            .extend(instrumented.instrumented.mutants.iter().cloned());
        // new mutants need coverage like the rest
        self.coverage = CoverageState::Pending;
        Ok(instrumented)
    }

    /// Run the coverage pass, or skip it when coverage-based testing is off
    pub fn get_coverage(&mut self) -> Result<Option<&CoverageMap>> {
        if !self.options.optimizations.coverage_based_test {
            self.skip_coverage();
            return Ok(None);
        }
        let map = CoverageAnalyser::new(&self.executor).determine_coverage(&mut self.mutants)?;
        self.coverage = CoverageState::Determined(map);
        match &self.coverage {
            CoverageState::Determined(map) => Ok(Some(map)),
            _ => Ok(None),
        }
    }

    /// Test every mutant against the whole suite
    pub fn skip_coverage(&mut self) {
        coverage::skip_coverage(&mut self.mutants);
        self.coverage = CoverageState::Skipped;
    }

    /// Mark the untested mutants of a unit that failed to build
    pub fn mark_compile_error(&mut self, unit: &Path) -> usize {
        let mut marked = 0;
        for mutant in self.mutants.iter_mut().filter(|m| m.file == unit) {
            if mutant.finalize(
                MutantStatus::CompileError,
                Some(format!("{} failed to compile", unit.display())),
            ) {
                marked += 1;
            }
        }
        if marked > 0 {
            warn!(unit = %unit.display(), mutants = marked, "compilation unit failed to build");
        }
        marked
    }

    /// Schedule and test every mutant still waiting for a verdict
    pub fn test(&mut self, reporter: &dyn Reporter) -> Result<&[Mutant]> {
        if matches!(self.coverage, CoverageState::Pending) {
            return Err(MutationError::CoverageNotDetermined);
        }

        let (waiting, done): (Vec<Mutant>, Vec<Mutant>) = std::mem::take(&mut self.mutants)
            .into_iter()
            .partition(|m| m.status == MutantStatus::NotRun);
        let groups = build_groups(&waiting, &self.options.optimizations);
        info!(
            waiting = waiting.len(),
            settled = done.len(),
            groups = groups.len(),
            "mutants scheduled"
        );

        let tested = match run_groups(waiting.clone(), &groups, &self.executor, &self.options, reporter) {
            Ok(tested) => tested,
            Err(e) => {
                self.mutants = waiting.into_iter().chain(done).collect();
                self.mutants.sort_by_key(|m| m.id);
                return Err(e);
            }
        };

        self.mutants = tested.into_iter().chain(done).collect();
        self.mutants.sort_by_key(|m| m.id);
        reporter.on_all_mutants_tested(&self.mutants);
        Ok(&self.mutants)
    }
}
