//! CLI for guard-based mutation testing

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use mutation_switchboard::codegen::{self, InstrumentedSource};
use mutation_switchboard::placement::{PlacementEngine, DEFAULT_CONTROL_MODULE};
use mutation_switchboard::report::TestedMutant;
use mutation_switchboard::{validate_mutations, Config, Mutant, Settings};

#[derive(Parser)]
#[command(name = "mutation-switchboard")]
#[command(author, version, about = "Guard-based mutation testing for Rust", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Place every mutant behind a runtime guard
    Instrument {
        /// Path to the mutations config file (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Project directory (defaults to current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Crate root that receives the control module, relative to the project
        #[arg(long, default_value = "src/lib.rs")]
        crate_root: PathBuf,

        /// Further source files to instrument, relative to the project
        files: Vec<PathBuf>,

        /// Write instrumented sources under this directory instead of in place
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Write the mutant registry as JSON to this file
        #[arg(short, long)]
        registry: Option<PathBuf>,
    },

    /// Remove instrumentation from files in place
    Revert {
        files: Vec<PathBuf>,

        #[arg(long, default_value = DEFAULT_CONTROL_MODULE)]
        control_module: String,
    },

    /// Print the source of one instrumented file as it runs with a mutant active
    Show {
        file: PathBuf,

        mutant: u32,

        #[arg(long, default_value = DEFAULT_CONTROL_MODULE)]
        control_module: String,
    },

    /// Validate mutation configuration without instrumenting
    Validate {
        /// Path to the mutations config file
        #[arg(short, long, default_value = "mutations.yaml")]
        config: PathBuf,

        /// Project directory (defaults to current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Show example configuration
    Example,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Instrument {
            config,
            project,
            crate_root,
            files,
            out,
            registry,
        } => instrument(
            config.as_deref(),
            &project.unwrap_or_else(|| PathBuf::from(".")),
            &crate_root,
            &files,
            out.as_deref(),
            registry.as_deref(),
        ),
        Commands::Revert {
            files,
            control_module,
        } => revert(&files, &control_module),
        Commands::Show {
            file,
            mutant,
            control_module,
        } => show(&file, mutant, &control_module),
        Commands::Validate { config, project } => {
            return validate_config(&config, project);
        }
        Commands::Example => {
            print_example();
            return ExitCode::SUCCESS;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config {
            version: "1.0".to_string(),
            settings: Settings::default(),
            mutations: Vec::new(),
        }),
    }
}

fn instrument(
    config_path: Option<&Path>,
    project_dir: &Path,
    crate_root: &Path,
    files: &[PathBuf],
    out: Option<&Path>,
    registry: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let catalog = config.catalog()?;
    let mut engine = PlacementEngine::new(catalog, config.settings.placement_options()?);

    let mut mutants: Vec<Mutant> = Vec::new();
    let targets = std::iter::once((crate_root, true)).chain(files.iter().map(|f| (f.as_path(), false)));
    for (relative, is_root) in targets {
        let path = project_dir.join(relative);
        let surface = is_root.then_some(config.settings.control_surface.as_str());
        let InstrumentedSource {
            instrumented,
            source,
        } = codegen::instrument_file(&mut engine, &path, surface)
            .with_context(|| format!("instrumenting {}", path.display()))?;

        let destination = match out {
            Some(dir) => {
                let destination = dir.join(relative);
                if let Some(parent) = destination.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                destination
            }
            None => path.clone(),
        };
        codegen::write_atomic(&destination, &source)?;
        println!(
            "{} {} ({} mutants)",
            "✓".green(),
            destination.display(),
            instrumented.mutants.len()
        );
        mutants.extend(instrumented.mutants);
    }

    if let Some(registry) = registry {
        let records: Vec<TestedMutant> = mutants.iter().map(TestedMutant::from).collect();
        let json = serde_json::to_string_pretty(&records).context("serializing mutant registry")?;
        codegen::write_atomic(registry, &json)?;
    }

    println!();
    println!(
        "{} {} mutants placed behind guards",
        "✓".green().bold(),
        mutants.len()
    );
    Ok(())
}

fn revert(files: &[PathBuf], control_module: &str) -> Result<()> {
    for path in files {
        let source = codegen::read_source(path)?;
        let reverted = codegen::revert_source(path, &source, control_module)
            .with_context(|| format!("reverting {}", path.display()))?;
        codegen::write_atomic(path, &reverted)?;
        println!("{} {}", "✓".green(), path.display());
    }
    Ok(())
}

fn show(path: &Path, mutant: u32, control_module: &str) -> Result<()> {
    let source = codegen::read_source(path)?;
    let materialized = codegen::materialize_source(path, &source, control_module, mutant)
        .with_context(|| format!("materializing mutant {mutant} of {}", path.display()))?;
    print!("{materialized}");
    Ok(())
}

fn validate_config(config_path: &Path, project: Option<PathBuf>) -> ExitCode {
    let project_dir = project.unwrap_or_else(|| PathBuf::from("."));

    println!("{}", "Loading configuration...".dimmed());
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(errors) = config.validate() {
        let settings_errors: Vec<_> = errors
            .iter()
            .filter(|e| matches!(e, mutation_switchboard::MutationError::ConfigError { .. }))
            .collect();
        if !settings_errors.is_empty() {
            for error in settings_errors {
                eprintln!("  • {}", error);
            }
            return ExitCode::FAILURE;
        }
    }

    println!("Found {} mutation(s) in config", config.mutations.len());
    println!("{}", "Validating mutations...".dimmed());
    println!();

    let validation_results = validate_mutations(&config, &project_dir);
    for (mutation, result) in config.mutations.iter().zip(&validation_results) {
        let mark = if result.is_ok() { "✓".green() } else { "✗".red() };
        println!(
            "{} {} -> {} in {}::{}",
            mark,
            mutation.original,
            mutation.replacement,
            mutation.file.display(),
            mutation.function
        );
        if let Err(e) = result {
            println!("  {}: {}", "Error".red(), e);
        }
    }

    println!();
    let error_count = validation_results.iter().filter(|r| r.is_err()).count();
    if error_count == 0 {
        println!(
            "{} All {} mutations are valid!",
            "✓".green().bold(),
            config.mutations.len()
        );
        ExitCode::SUCCESS
    } else {
        println!(
            "{} {} of {} mutations have errors",
            "✗".red().bold(),
            error_count,
            config.mutations.len()
        );
        ExitCode::FAILURE
    }
}

fn print_example() {
    let example = r#"# Example mutations.yaml configuration file
version: "1.0"

settings:
  timeout: 30                # base seconds per test batch
  timeout_per_mutant_ms: 200 # extra time per mutant in a batch
  concurrent_runners: 4
  control_surface: switchboard
  control_module: __switchboard
  default_operators: true    # built-in operator mutations
  # traced_mutants: [3, 7]   # log every guard hit of these mutants
  optimizations:
    coverage_based_test: true
    disable_test_mix: false
    abort_test_on_kill: true

# Extra mutations, placed wherever the original expression occurs
mutations:
  - file: src/calculator.rs
    function: add
    original: a + b
    replacement: a * b

  - file: src/validator.rs
    function: is_adult
    original: age >= 18
    replacement: age > 18

  - file: src/auth.rs
    function: authenticate
    original: password == stored
    replacement: "true"
"#;

    println!("{}", example);
}
