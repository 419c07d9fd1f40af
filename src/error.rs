//! Rich diagnostic error types for kg-answer.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Only store errors ever reach the caller
//! of the pipeline; completion, context and synthesis errors are absorbed into
//! degraded output by the orchestrator.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;
use crate::ontology::OntologyError;

/// Top-level error type for kg-answer.
#[derive(Debug, Error, Diagnostic)]
pub enum KgaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ontology(#[from] OntologyError),
}

pub type KgaResult<T> = std::result::Result<T, KgaError>;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("cannot connect to triple store at {endpoint}: {message}")]
    #[diagnostic(
        code(kga::store::connection),
        help(
            "Check that the triple store is running and that the repository \
             name in the endpoint URL exists."
        )
    )]
    Connection { endpoint: String, message: String },

    #[error("triple store at {endpoint} did not answer within {timeout_secs}s")]
    #[diagnostic(
        code(kga::store::timeout),
        help("Increase `store.timeout_secs` or simplify the query.")
    )]
    Timeout { endpoint: String, timeout_secs: u64 },

    #[error("query rejected by the triple store (status {status}): {message}")]
    #[diagnostic(
        code(kga::store::rejected),
        help(
            "The generated SPARQL is malformed or uses an unknown prefix. \
             Check that the ontology namespace matches the one loaded in the store."
        )
    )]
    Rejected { status: u16, message: String },

    #[error("triple store error (status {status}): {message}")]
    #[diagnostic(
        code(kga::store::server),
        help("The store failed while evaluating the query. Check its logs.")
    )]
    Server { status: u16, message: String },

    #[error("unexpected triple store response: {message}")]
    #[diagnostic(
        code(kga::store::protocol),
        help("The endpoint must return application/sparql-results+json.")
    )]
    Protocol { message: String },

    #[error("failed to load RDF data from {path}: {message}")]
    #[diagnostic(
        code(kga::store::load),
        help("Supported formats are Turtle (.ttl), N-Triples (.nt) and RDF/XML (.rdf, .owl).")
    )]
    Load { path: String, message: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Coarse classification of an execution failure, reported to callers so they
/// can tell "the store is down" apart from "the query was bad".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFailureKind {
    Connectivity,
    Timeout,
    MalformedQuery,
    Store,
}

impl std::fmt::Display for ExecutionFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connectivity => "connectivity",
            Self::Timeout => "timeout",
            Self::MalformedQuery => "malformed query",
            Self::Store => "store error",
        };
        f.write_str(label)
    }
}

impl StoreError {
    /// Classify this error for the pipeline's failure report.
    pub fn failure_kind(&self) -> ExecutionFailureKind {
        match self {
            Self::Connection { .. } => ExecutionFailureKind::Connectivity,
            Self::Timeout { .. } => ExecutionFailureKind::Timeout,
            Self::Rejected { .. } => ExecutionFailureKind::MalformedQuery,
            Self::Server { .. } | Self::Protocol { .. } | Self::Load { .. } => {
                ExecutionFailureKind::Store
            }
        }
    }

    /// Short user-facing hint, without internal details.
    pub fn hint(&self) -> &'static str {
        match self.failure_kind() {
            ExecutionFailureKind::Connectivity => {
                "the triple store is unreachable; check that it is running"
            }
            ExecutionFailureKind::Timeout => "the triple store took too long to answer",
            ExecutionFailureKind::MalformedQuery => {
                "the generated query was rejected; try rephrasing the question"
            }
            ExecutionFailureKind::Store => "the triple store could not evaluate the query",
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(kga::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(kga::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config file: {path}")]
    #[diagnostic(
        code(kga::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(kga::config::invalid))]
    Invalid { message: String },

    #[error("invalid fallback pattern {pattern:?}: {message}")]
    #[diagnostic(
        code(kga::config::pattern),
        help(
            "Fallback patterns are regular expressions that must match up to and \
             including the opening brace of the WHERE block."
        )
    )]
    Pattern { pattern: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
