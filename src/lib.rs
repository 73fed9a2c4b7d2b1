//! Guard-based mutation testing for Rust
//!
//! Every mutant of a crate is compiled once. Each mutation site becomes a
//! runtime guard that picks the original or the mutated code depending on
//! which mutant is active, so one build serves the whole run.
//!
//! The pieces, leaf first:
//! - [`placement`] rewrites a `syn` tree, putting every catalog candidate
//!   behind a guard and recording reversible [`markers`]
//! - [`runtime`] and [`collector`] form the in-process protocol that selects
//!   the active mutant per test case and reports coverage
//! - [`coverage`] turns one coverage pass into covering-test sets
//! - [`scheduler`] groups mutants whose covering tests never overlap
//! - [`runner`] runs the groups on a bounded worker pool
//! - [`process`] drives a whole run
//!
//! # Example Configuration
//!
//! ```yaml
//! version: "1.0"
//! settings:
//!   timeout: 30
//!   concurrent_runners: 4
//!
//! mutations:
//!   - file: src/math.rs
//!     function: add
//!     original: a + b
//!     replacement: a * b
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use mutation_switchboard::{codegen, Config, PlacementEngine};
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("mutations.yaml")).unwrap();
//! let mut engine = PlacementEngine::new(
//!     config.catalog().unwrap(),
//!     config.settings.placement_options().unwrap(),
//! );
//! let root = codegen::instrument_file(&mut engine, Path::new("src/lib.rs"), Some("switchboard")).unwrap();
//! println!("{} mutants", root.instrumented.mutants.len());
//! ```

pub mod catalog;
pub mod codegen;
pub mod collector;
pub mod config;
pub mod coverage;
pub mod error;
pub mod guards;
pub mod markers;
pub mod matcher;
pub mod mutant;
pub mod placement;
pub mod process;
pub mod report;
pub mod runner;
pub mod runtime;
pub mod scheduler;

/// Name the control module registers its surface under unless configured
pub const DEFAULT_CONTROL_SURFACE: &str = "switchboard";

// Re-export main types at crate root
pub use codegen::validate_mutations;
pub use collector::{Collector, DataSink, SessionConfig};
pub use config::{Config, MutationConfig, Settings};
pub use coverage::{CoverageAnalyser, CoverageMap};
pub use error::{MutationError, Result};
pub use mutant::{Mutant, MutantId, MutantStatus, TestSet};
pub use placement::{PlacementEngine, PlacementOptions};
pub use process::MutationTestProcess;
pub use report::{MutationReport, Reporter};
pub use runner::{run_groups, RunOptions, TestExecutor};
pub use runtime::MutantControl;
pub use scheduler::{build_groups, OptimizationFlags, TestGroup};
