//! Error types for mutation testing

use std::path::PathBuf;
use thiserror::Error;

use crate::mutant::{MutantId, MutantStatus};

/// Errors that can occur during mutation testing
#[derive(Debug, Error)]
pub enum MutationError {
    /// Original code couldn't be parsed as valid Rust
    #[error("Invalid original expression: '{code}'\n  Parse error: {parse_error}")]
    InvalidOriginal { code: String, parse_error: String },

    /// Replacement code couldn't be parsed as valid Rust
    #[error("Invalid replacement expression: '{code}'\n  Parse error: {parse_error}")]
    InvalidReplacement { code: String, parse_error: String },

    /// Target file doesn't exist
    #[error("File not found: {}", file.display())]
    FileNotFound { file: PathBuf },

    /// Failed to read source file
    #[error("Failed to read file '{}': {error}", file.display())]
    FileReadError { file: PathBuf, error: String },

    /// Failed to parse source file as Rust
    #[error("Failed to parse '{}' as Rust: {error}", file.display())]
    ParseError { file: PathBuf, error: String },

    /// Target function not found in file
    #[error("Function '{function}' not found in {}\n  Available functions: {}", file.display(), available_functions.join(", "))]
    FunctionNotFound {
        file: PathBuf,
        function: String,
        available_functions: Vec<String>,
    },

    /// Original expression not found in function
    #[error("Expression '{original}' not found in function '{function}'")]
    NoMatch {
        file: PathBuf,
        function: String,
        original: String,
    },

    /// The tree already carries guards, markers or the control module
    #[error("'{}' is already instrumented ({evidence})", file.display())]
    AlreadyInstrumented { file: PathBuf, evidence: String },

    /// A marker no longer has the shape its inverse expects
    #[error("Cannot revert marker {marker}: {reason}")]
    AmbiguousReversal { marker: String, reason: String },

    /// Session configuration document couldn't be read or written
    #[error("Invalid session document: {message}")]
    InvalidDocument { message: String },

    /// Coverage payload from the instrumented process is malformed
    #[error("Invalid coverage payload '{payload}': {reason}")]
    InvalidPayload { payload: String, reason: String },

    /// A mutant reached the coordinator in a state upstream should have prevented
    #[error("Mutant {mutant} was passed to test execution with status {status:?}; only not-run mutants can be tested")]
    InvariantViolation { mutant: MutantId, status: MutantStatus },

    /// Test groups were requested before coverage was determined or skipped
    #[error("Coverage must be determined (or explicitly skipped) before mutants are scheduled")]
    CoverageNotDetermined,

    /// Failed to write instrumented file
    #[error("Failed to write file '{}': {error}", file.display())]
    WriteError { file: PathBuf, error: String },

    /// Test execution failed
    #[error("Test execution failed: {error}")]
    TestExecutionError { error: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

/// Result type for mutation operations
pub type Result<T> = std::result::Result<T, MutationError>;
