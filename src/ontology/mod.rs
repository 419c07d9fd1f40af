//! Ontology descriptor: the schema text and few-shot exemplars injected into
//! every query-generation prompt.
//!
//! The descriptor is plain data. It is built once at startup (from the
//! built-in equestrian ontology or a TOML file), wrapped in an `Arc` and shared
//! read-only by every pipeline invocation. It is versioned alongside the graph
//! schema it documents; nothing checks it against the live store.

mod equestrian;

use std::fmt::Write as _;
use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading an ontology descriptor file.
#[derive(Debug, Error, Diagnostic)]
pub enum OntologyError {
    #[error("failed to read ontology descriptor: {path}")]
    #[diagnostic(
        code(kga::ontology::read),
        help("Ensure the file configured in `ontology.file` exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ontology descriptor {path}: {message}")]
    #[diagnostic(
        code(kga::ontology::parse),
        help("The descriptor is TOML with a `summary` string and `[[exemplars]]` tables.")
    )]
    Parse { path: String, message: String },

    #[error("ontology descriptor {path} has an empty summary")]
    #[diagnostic(
        code(kga::ontology::empty),
        help("Describe the classes, properties and relations of the graph in `summary`.")
    )]
    Empty { path: String },
}

/// A SPARQL prefix declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub name: String,
    pub iri: String,
}

impl Prefix {
    pub fn new(name: impl Into<String>, iri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iri: iri.into(),
        }
    }
}

/// A worked question → query example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exemplar {
    pub question: String,
    /// Classes, properties, relations and filters the question needs.
    pub analysis: String,
    pub query: String,
}

/// Schema summary plus ordered exemplars.
///
/// Always holds at least one prefix: the ontology's own, listed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OntologyDescriptor {
    summary: String,
    prefixes: Vec<Prefix>,
    exemplars: Vec<Exemplar>,
}

/// On-disk shape of a descriptor file.
#[derive(Debug, Deserialize)]
struct DescriptorFile {
    summary: String,
    #[serde(default)]
    prefixes: Vec<Prefix>,
    #[serde(default)]
    exemplars: Vec<Exemplar>,
}

/// Prefixes every query may rely on besides the ontology's own.
const STANDARD_PREFIXES: [(&str, &str); 4] = [
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
];

impl OntologyDescriptor {
    /// Build a descriptor. The ontology's own prefix is listed first, followed by
    /// the standard RDF prefixes not already declared.
    pub fn new(
        summary: impl Into<String>,
        prefix: Prefix,
        exemplars: Vec<Exemplar>,
    ) -> Self {
        let mut prefixes = vec![prefix];
        for (name, iri) in STANDARD_PREFIXES {
            if !prefixes.iter().any(|p| p.name == name) {
                prefixes.push(Prefix::new(name, iri));
            }
        }
        Self {
            summary: summary.into(),
            prefixes,
            exemplars,
        }
    }

    /// The built-in equestrian ontology (horses, riders, trainings, events,
    /// experimental devices) under the given namespace and prefix.
    pub fn equestrian(namespace: &str, prefix: &str) -> Self {
        equestrian::descriptor(namespace, prefix)
    }

    /// Load a descriptor from a TOML file.
    ///
    /// `default_prefix` stays the primary prefix. A file entry with the same
    /// name replaces its IRI; other file prefixes are declared after the
    /// standard ones.
    pub fn load(path: &Path, default_prefix: Prefix) -> Result<Self, OntologyError> {
        let content = std::fs::read_to_string(path).map_err(|e| OntologyError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let parsed: DescriptorFile =
            toml::from_str(&content).map_err(|e| OntologyError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        if parsed.summary.trim().is_empty() {
            return Err(OntologyError::Empty {
                path: path.display().to_string(),
            });
        }

        let (own, others): (Vec<Prefix>, Vec<Prefix>) = parsed
            .prefixes
            .into_iter()
            .partition(|p| p.name == default_prefix.name);
        let primary = own.into_iter().next().unwrap_or(default_prefix);
        let mut descriptor = Self::new(parsed.summary, primary, parsed.exemplars);
        for extra in others {
            if !descriptor.prefixes.iter().any(|p| p.name == extra.name) {
                descriptor.prefixes.push(extra);
            }
        }
        Ok(descriptor)
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn exemplars(&self) -> &[Exemplar] {
        &self.exemplars
    }

    pub fn prefixes(&self) -> &[Prefix] {
        &self.prefixes
    }

    /// The ontology's own prefix (always the first one).
    pub fn primary_prefix(&self) -> &Prefix {
        &self.prefixes[0]
    }

    /// `PREFIX` declarations, one per line.
    pub fn prefix_block(&self) -> String {
        self.prefixes
            .iter()
            .map(|p| format!("PREFIX {}: <{}>", p.name, p.iri))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full text injected into the generation prompt: schema summary, prefixes
    /// and the numbered exemplar block.
    pub fn describe(&self) -> String {
        let mut text = String::with_capacity(self.summary.len() + 512 * self.exemplars.len());
        text.push_str(self.summary.trim());
        text.push_str("\n\n## PREFIXES\n");
        text.push_str(&self.prefix_block());

        if !self.exemplars.is_empty() {
            text.push_str("\n\n## FEW-SHOT EXAMPLES (learn from these)\n");
            for (i, ex) in self.exemplars.iter().enumerate() {
                let _ = write!(
                    text,
                    "\n---\n\nEXAMPLE {}:\nQuestion: \"{}\"\n\nAnalysis:\n{}\n\nSPARQL:\n{}\n",
                    i + 1,
                    ex.question,
                    ex.analysis.trim(),
                    ex.query.trim()
                );
            }
        }
        text
    }
}
