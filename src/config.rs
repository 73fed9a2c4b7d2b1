//! Configuration file parsing for mutation testing

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{CatalogSet, ConfiguredCatalog, DefaultCatalog};
use crate::error::MutationError;
use crate::mutant::MutantId;
use crate::placement::{PlacementOptions, DEFAULT_CONTROL_MODULE};
use crate::runner::{CancelToken, RunOptions, TimeoutPolicy};
use crate::scheduler::OptimizationFlags;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub mutations: Vec<MutationConfig>,
}

/// Global settings for mutation testing
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base timeout in seconds for each test batch
    pub timeout: u64,
    /// Extra milliseconds granted per mutant in a batch
    pub timeout_per_mutant_ms: u64,
    pub concurrent_runners: usize,
    /// Name the control module registers its surface under
    pub control_surface: String,
    /// Name of the module injected into the instrumented crate
    pub control_module: String,
    /// Use the built-in operators next to the configured mutations
    pub default_operators: bool,
    pub dev_mode: bool,
    pub traced_mutants: Option<Vec<MutantId>>,
    pub optimizations: OptimizationFlags,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: 30,
            timeout_per_mutant_ms: 0,
            concurrent_runners: 1,
            control_surface: crate::DEFAULT_CONTROL_SURFACE.to_string(),
            control_module: DEFAULT_CONTROL_MODULE.to_string(),
            default_operators: true,
            dev_mode: false,
            traced_mutants: None,
            optimizations: OptimizationFlags::default(),
        }
    }
}

impl Settings {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_parallelism: self.concurrent_runners.max(1),
            optimizations: self.optimizations,
            traced_mutants: self
                .traced_mutants
                .as_ref()
                .map(|ids| ids.iter().copied().collect::<BTreeSet<_>>()),
            dev_mode: self.dev_mode,
            timeout: TimeoutPolicy {
                base: Duration::from_secs(self.timeout),
                per_mutant: Duration::from_millis(self.timeout_per_mutant_ms),
            },
            control_surface: self.control_surface.clone(),
            cancel: CancelToken::new(),
        }
    }

    pub fn placement_options(&self) -> Result<PlacementOptions, MutationError> {
        PlacementOptions::new(&self.control_module)
    }
}

/// A single mutation definition
#[derive(Debug, Deserialize, Clone)]
pub struct MutationConfig {
    /// Path to the Rust source file
    pub file: PathBuf,
    /// Name of the function containing the code
    pub function: String,
    /// The code to find (parsed as AST)
    pub original: String,
    /// The code to replace it with
    pub replacement: String,
    /// Optional unique identifier (auto-generated if omitted)
    #[serde(default = "generate_id")]
    pub id: String,
}

fn generate_id() -> String {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(1);
    format!("mutation_{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

impl MutationConfig {
    pub fn description(&self) -> String {
        format!(
            "{} -> {} in {}::{}",
            self.original,
            self.replacement,
            self.file.display(),
            self.function
        )
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, MutationError> {
        let content = std::fs::read_to_string(path).map_err(|e| MutationError::ConfigError {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| MutationError::ConfigError {
                message: format!("Failed to parse config file '{}': {}", path.display(), e),
            })?;

        Ok(config)
    }

    /// Catalogs selected by the settings, in the order they are consulted
    pub fn catalog(&self) -> Result<CatalogSet, MutationError> {
        let mut catalogs = CatalogSet::new();
        if self.settings.default_operators {
            catalogs = catalogs.with(DefaultCatalog);
        }
        if !self.mutations.is_empty() {
            catalogs = catalogs.with(ConfiguredCatalog::new(&self.mutations)?);
        }
        Ok(catalogs)
    }

    /// Validate the settings and all configured mutations
    pub fn validate(&self) -> Result<(), Vec<MutationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.settings.placement_options() {
            errors.push(e);
        }
        if self.settings.control_surface.trim().is_empty() {
            errors.push(MutationError::ConfigError {
                message: "control_surface must not be empty".to_string(),
            });
        }

        for mutation in &self.mutations {
            if !mutation.file.exists() {
                errors.push(MutationError::FileNotFound {
                    file: mutation.file.clone(),
                });
                continue;
            }

            if let Err(e) = syn::parse_str::<syn::Expr>(&mutation.original) {
                errors.push(MutationError::InvalidOriginal {
                    code: mutation.original.clone(),
                    parse_error: e.to_string(),
                });
            }

            if let Err(e) = syn::parse_str::<syn::Expr>(&mutation.replacement) {
                errors.push(MutationError::InvalidReplacement {
                    code: mutation.replacement.clone(),
                    parse_error: e.to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
