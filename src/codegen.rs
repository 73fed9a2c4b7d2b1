//! Source pipeline
//!
//! This module reads and parses source files, runs placement over them,
//! injects the control module into the crate root and prints the result.
//! It also turns instrumented sources back into plain or single-mutant code.

use std::io::Write;
use std::path::Path;

use syn::{Attribute, Item};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{MutationError, Result};
use crate::guards::GUARD_FN;
use crate::markers;
use crate::matcher::{collect_function_names, count_matches_in_function};
use crate::mutant::MutantId;
use crate::placement::{InstrumentedFile, PlacementEngine, PlacementOptions};

/// Crate the generated control module links against
pub const RUNTIME_CRATE: &str = "mutation_switchboard";

/// Generate source code from AST
pub fn generate_source(ast: &syn::File) -> String {
    prettyplease::unparse(ast)
}

pub fn parse_source(path: &Path, source: &str) -> Result<syn::File> {
    syn::parse_file(source).map_err(|e| MutationError::ParseError {
        file: path.to_path_buf(),
        error: e.to_string(),
    })
}

pub fn read_source(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(MutationError::FileNotFound {
            file: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|e| MutationError::FileReadError {
        file: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Lints the guards and markers would otherwise trip in the instrumented crate
fn lint_allowance() -> Attribute {
    syn::parse_quote! {
        #![allow(unused_parens, unused_labels, unused_mut, unused_braces, unreachable_code)]
    }
}

fn is_lint_allowance(attr: &Attribute) -> bool {
    let expected = lint_allowance();
    quote::ToTokens::to_token_stream(attr).to_string()
        == quote::ToTokens::to_token_stream(&expected).to_string()
}

fn control_ident(options: &PlacementOptions) -> Result<syn::Ident> {
    syn::parse_str(&options.control_module).map_err(|e| MutationError::ConfigError {
        message: format!(
            "control module '{}' is not an identifier: {e}",
            options.control_module
        ),
    })
}

/// The module every guard calls into
///
/// It owns the crate's `MutantControl` static and registers it under
/// `surface` the first time a guard runs.
pub fn control_module(options: &PlacementOptions, surface: &str) -> Result<Item> {
    let name = control_ident(options)?;
    let runtime = syn::Ident::new(RUNTIME_CRATE, proc_macro2::Span::call_site());
    let guard_fn = syn::Ident::new(GUARD_FN, proc_macro2::Span::call_site());
    Ok(syn::parse_quote! {
        #[doc(hidden)]
        #[allow(dead_code)]
        pub(crate) mod #name {
            static CONTROL: ::#runtime::runtime::MutantControl = ::#runtime::runtime::MutantControl::new();
            static REGISTER: ::std::sync::Once = ::std::sync::Once::new();

            #[inline]
            pub fn #guard_fn(id: u32) -> bool {
                REGISTER.call_once(|| ::#runtime::runtime::register_surface(#surface, &CONTROL));
                CONTROL.check(id)
            }
        }
    })
}

/// Add the control module to a crate root
pub fn inject_control_module(file: &mut syn::File, options: &PlacementOptions, surface: &str) -> Result<()> {
    file.items.push(control_module(options, surface)?);
    Ok(())
}

/// Drop the control module and the lint allowance, leaving markers in place
fn remove_scaffolding(file: &mut syn::File, control_module: &str) {
    file.attrs.retain(|attr| !is_lint_allowance(attr));
    file.items
        .retain(|item| !matches!(item, Item::Mod(m) if m.ident == control_module));
}

/// An instrumented file and its printed source
#[derive(Debug, Clone)]
pub struct InstrumentedSource {
    pub instrumented: InstrumentedFile,
    pub source: String,
}

/// Instrument one file's source
///
/// `surface` is set for the crate root, which also receives the control
/// module.
pub fn instrument_source(
    engine: &mut PlacementEngine,
    path: &Path,
    source: &str,
    surface: Option<&str>,
) -> Result<InstrumentedSource> {
    let ast = parse_source(path, source)?;
    if ast.attrs.iter().any(is_lint_allowance) {
        return Err(MutationError::AlreadyInstrumented {
            file: path.to_path_buf(),
            evidence: "instrumentation lint allowance is present".to_string(),
        });
    }

    let mut instrumented = engine.place(path, &ast)?;
    instrumented.file.attrs.insert(0, lint_allowance());
    if let Some(surface) = surface {
        inject_control_module(&mut instrumented.file, engine.options(), surface)?;
    }
    debug!(
        file = %path.display(),
        mutants = instrumented.mutants.len(),
        crate_root = surface.is_some(),
        "instrumented source"
    );

    Ok(InstrumentedSource {
        source: generate_source(&instrumented.file),
        instrumented,
    })
}

pub fn instrument_file(
    engine: &mut PlacementEngine,
    path: &Path,
    surface: Option<&str>,
) -> Result<InstrumentedSource> {
    let source = read_source(path)?;
    instrument_source(engine, path, &source, surface)
}

/// Source with every trace of instrumentation removed
pub fn revert_source(path: &Path, source: &str, control_module: &str) -> Result<String> {
    let mut ast = parse_source(path, source)?;
    remove_scaffolding(&mut ast, control_module);
    let reverted = markers::strip(&ast, control_module)?;
    Ok(generate_source(&reverted))
}

/// Source of the program as it runs with `mutant` active
pub fn materialize_source(
    path: &Path,
    source: &str,
    control_module: &str,
    mutant: MutantId,
) -> Result<String> {
    let mut ast = parse_source(path, source)?;
    remove_scaffolding(&mut ast, control_module);
    let materialized = markers::materialize(&ast, control_module, mutant)?;
    Ok(generate_source(&materialized))
}

fn write_error(path: &Path, error: impl std::fmt::Display) -> MutationError {
    MutationError::WriteError {
        file: path.to_path_buf(),
        error: error.to_string(),
    }
}

/// Replace `path` with `contents` without exposing a partial write
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_error(path, e))?;
    temp.write_all(contents.as_bytes())
        .map_err(|e| write_error(path, e))?;
    temp.persist(path).map_err(|e| write_error(path, e.error))?;
    Ok(())
}

/// Check that every configured mutation can be placed
///
/// Returns one result per mutation, in config order.
pub fn validate_mutations(config: &Config, project_dir: &Path) -> Vec<Result<()>> {
    let results: Vec<Result<()>> = config
        .mutations
        .iter()
        .map(|mutation| {
            let path = project_dir.join(&mutation.file);
            let ast = parse_source(&path, &read_source(&path)?)?;

            let original: syn::Expr =
                syn::parse_str(&mutation.original).map_err(|e| MutationError::InvalidOriginal {
                    code: mutation.original.clone(),
                    parse_error: e.to_string(),
                })?;
            syn::parse_str::<syn::Expr>(&mutation.replacement).map_err(|e| {
                MutationError::InvalidReplacement {
                    code: mutation.replacement.clone(),
                    parse_error: e.to_string(),
                }
            })?;

            let functions = collect_function_names(&ast);
            if !functions.contains(&mutation.function) {
                return Err(MutationError::FunctionNotFound {
                    file: mutation.file.clone(),
                    function: mutation.function.clone(),
                    available_functions: functions,
                });
            }
            if count_matches_in_function(&ast, &mutation.function, &original) == 0 {
                return Err(MutationError::NoMatch {
                    file: mutation.file.clone(),
                    function: mutation.function.clone(),
                    original: mutation.original.clone(),
                });
            }
            Ok(())
        })
        .collect();

    info!(
        mutations = results.len(),
        valid = results.iter().filter(|r| r.is_ok()).count(),
        "validated configured mutations"
    );
    results
}
