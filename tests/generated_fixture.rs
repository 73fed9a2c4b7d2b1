//! `instrumented_gauges.rs` is the placement output for `fixtures/gauges.rs`,
//! checked in so that it builds and runs as its own test crate. These tests
//! keep it in step with what placement emits.
//!
//! Regenerate with `SWITCHBOARD_BLESS=1 cargo test --test generated_fixture`.

use std::path::Path;

use pretty_assertions::assert_eq;
use quote::ToTokens;

use mutation_switchboard::catalog::DefaultCatalog;
use mutation_switchboard::codegen;
use mutation_switchboard::mutant::MutatorKind;
use mutation_switchboard::placement::DEFAULT_CONTROL_MODULE;
use mutation_switchboard::{PlacementEngine, PlacementOptions};

const PLAIN: &str = include_str!("fixtures/gauges.rs");
const INSTRUMENTED: &str = include_str!("instrumented_gauges.rs");

fn tokens(source: &str) -> String {
    syn::parse_file(source).unwrap().into_token_stream().to_string()
}

fn generate() -> codegen::InstrumentedSource {
    let mut engine = PlacementEngine::new(DefaultCatalog, PlacementOptions::default());
    codegen::instrument_source(
        &mut engine,
        Path::new("tests/fixtures/gauges.rs"),
        PLAIN,
        Some("gauges"),
    )
    .unwrap()
}

#[test]
fn test_checked_in_output_is_current() {
    let generated = generate();
    if std::env::var_os("SWITCHBOARD_BLESS").is_some() {
        let target = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/instrumented_gauges.rs");
        codegen::write_atomic(&target, &generated.source).unwrap();
        return;
    }
    assert_eq!(tokens(&generated.source), tokens(INSTRUMENTED));
}

#[test]
fn test_mutants_of_the_fixture() {
    let generated = generate();
    let kinds: Vec<_> = generated
        .instrumented
        .mutants
        .iter()
        .map(|m| (m.id, m.function.as_deref().unwrap_or_default(), m.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (0, "scale", MutatorKind::Arithmetic),
            (1, "scale", MutatorKind::Arithmetic),
            (2, "tally", MutatorKind::Statement),
            (3, "bump_all", MutatorKind::Statement),
            (4, "bump_all", MutatorKind::Statement),
            (5, "bump_all", MutatorKind::Assignment),
            (6, "read", MutatorKind::Statement),
            (7, "read", MutatorKind::Arithmetic),
        ]
    );
    assert_eq!(generated.instrumented.markers.rewrites().len(), 2);
}

#[test]
fn test_checked_in_output_reverts_to_the_fixture() {
    let reverted = codegen::revert_source(
        Path::new("tests/instrumented_gauges.rs"),
        INSTRUMENTED,
        DEFAULT_CONTROL_MODULE,
    )
    .unwrap();
    assert_eq!(tokens(&reverted), tokens(PLAIN));
}
