//! Report generation for mutation testing results
//!
//! This module receives tested mutants as they finish, summarizes a run and
//! renders tested-mutant records as JSON.

use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MutationError, Result};
use crate::mutant::{Mutant, MutantId, MutantStatus, MutatorKind};

/// Receives mutant outcomes from the coordinator
pub trait Reporter: Sync {
    /// A mutant reached a terminal status
    fn on_mutant_tested(&self, mutant: &Mutant);

    /// Every mutant of the run, after testing ended
    fn on_all_mutants_tested(&self, mutants: &[Mutant]);
}

/// Prints one line per tested mutant
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl Reporter for ConsoleReporter {
    fn on_mutant_tested(&self, mutant: &Mutant) {
        println!("{} {}", status_label(mutant.status), mutant.display_name());
        if self.verbose {
            if let Some(reason) = &mutant.status_reason {
                println!("        {}", reason.dimmed());
            }
        }
    }

    fn on_all_mutants_tested(&self, mutants: &[Mutant]) {
        MutationReport::new(mutants.to_vec(), Duration::ZERO).print();
    }
}

fn status_label(status: MutantStatus) -> colored::ColoredString {
    match status {
        MutantStatus::Killed => "[KILLED]".green().bold(),
        MutantStatus::Survived => "[SURVIVED]".red().bold(),
        MutantStatus::Timeout => "[TIMEOUT]".yellow().bold(),
        MutantStatus::CompileError => "[COMPILE ERROR]".yellow().bold(),
        MutantStatus::Ignored => "[IGNORED]".dimmed(),
        MutantStatus::Incomplete => "[INCOMPLETE]".yellow().bold(),
        MutantStatus::NotRun => "[NOT RUN]".dimmed(),
    }
}

/// Tested-mutant record, one per mutant in the JSON output
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestedMutant {
    pub id: MutantId,
    pub file: PathBuf,
    pub function: Option<String>,
    pub line: usize,
    pub column: usize,
    pub mutator: MutatorKind,
    pub original: String,
    pub replacement: String,
    pub status: MutantStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// `None` when the mutant ran against the whole suite
    pub covered_by: Option<Vec<String>>,
    pub killed_by: Vec<String>,
}

impl From<&Mutant> for TestedMutant {
    fn from(mutant: &Mutant) -> Self {
        Self {
            id: mutant.id,
            file: mutant.file.clone(),
            function: mutant.function.clone(),
            line: mutant.location.line,
            column: mutant.location.column,
            mutator: mutant.kind,
            original: mutant.original.clone(),
            replacement: mutant.replacement.clone(),
            status: mutant.status,
            status_reason: mutant.status_reason.clone(),
            covered_by: (!mutant.covering_tests.is_everything())
                .then(|| mutant.covering_tests.ids().cloned().collect()),
            killed_by: mutant.killing_tests.iter().cloned().collect(),
        }
    }
}

/// Summary report of mutation testing
#[derive(Debug)]
pub struct MutationReport {
    pub mutants: Vec<Mutant>,
    pub total_duration: Duration,
}

impl MutationReport {
    pub fn new(mutants: Vec<Mutant>, total_duration: Duration) -> Self {
        Self {
            mutants,
            total_duration,
        }
    }

    pub fn count(&self, status: MutantStatus) -> usize {
        self.mutants.iter().filter(|m| m.status == status).count()
    }

    pub fn total(&self) -> usize {
        self.mutants.len()
    }

    /// Detected share of the testable mutants, as a percentage
    ///
    /// Timeouts count as detected. Ignored, incomplete and non-compiling
    /// mutants are left out.
    pub fn score(&self) -> f64 {
        let detected = self.count(MutantStatus::Killed) + self.count(MutantStatus::Timeout);
        let testable = detected + self.count(MutantStatus::Survived);
        if testable == 0 {
            return 100.0;
        }
        (detected as f64 / testable as f64) * 100.0
    }

    /// Get surviving mutants (test gaps)
    pub fn survivors(&self) -> Vec<&Mutant> {
        self.mutants
            .iter()
            .filter(|m| m.status == MutantStatus::Survived)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        let records: Vec<TestedMutant> = self.mutants.iter().map(TestedMutant::from).collect();
        serde_json::to_string_pretty(&records).map_err(|e| MutationError::WriteError {
            file: PathBuf::from("<report>"),
            error: e.to_string(),
        })
    }

    /// Print the report to stdout
    pub fn print(&self) {
        println!();
        println!("{}", "Mutation Testing Report".bold());
        println!("{}", "=".repeat(60));

        println!();
        println!("{}", "Summary".bold());
        println!("{}", "-".repeat(40));
        println!("Total mutants:     {}", self.total());
        println!(
            "Killed:            {} {}",
            self.count(MutantStatus::Killed),
            "(good - tests caught the mutant)".dimmed()
        );
        println!(
            "Survived:          {} {}",
            self.count(MutantStatus::Survived),
            "(bad - tests missed the mutant)".dimmed()
        );
        for (label, status) in [
            ("Timeouts:          ", MutantStatus::Timeout),
            ("Compile errors:    ", MutantStatus::CompileError),
            ("Not covered:       ", MutantStatus::Ignored),
            ("Incomplete:        ", MutantStatus::Incomplete),
            ("Not run:           ", MutantStatus::NotRun),
        ] {
            let count = self.count(status);
            if count > 0 {
                println!("{label}{count}");
            }
        }

        println!();
        let score = self.score();
        let score_str = format!("{:.1}%", score);
        let score_colored = if score >= 90.0 {
            score_str.green().bold()
        } else if score >= 70.0 {
            score_str.yellow().bold()
        } else {
            score_str.red().bold()
        };
        println!("Mutation Score:    {}", score_colored);
        if !self.total_duration.is_zero() {
            println!("Duration:          {}", format_duration(self.total_duration));
        }

        let survivors = self.survivors();
        if !survivors.is_empty() {
            println!();
            println!("{}", "Surviving Mutants (improve your tests!)".red().bold());
            println!("{}", "-".repeat(40));
            for mutant in survivors {
                println!(
                    "  • {} -> {}",
                    mutant.original.yellow(),
                    mutant.replacement.yellow()
                );
                println!(
                    "    in function '{}' at {}:{}",
                    mutant.function.as_deref().unwrap_or("<item>"),
                    mutant.file.display(),
                    mutant.location.line
                );
            }
        }
    }
}

/// Format duration in a human-readable way
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining_secs)
    }
}
