//! In-process triple store backed by oxigraph.

use std::path::Path;

use oxigraph::io::RdfFormat;
use oxigraph::model::Term;
use oxigraph::sparql::{Query, QueryResults};
use oxigraph::store::Store;

use crate::error::{StoreError, StoreResult};

use super::{Binding, QueryExecutor, ResultSet, Value};

/// An in-memory oxigraph store, typically loaded from a local RDF export of
/// the knowledge graph.
pub struct EmbeddedStore {
    store: Store,
}

impl EmbeddedStore {
    /// Create an empty in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        let store = Store::new().map_err(|e| StoreError::Protocol {
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self { store })
    }

    /// Create a store holding the triples of `path`. The format is chosen
    /// from the file extension.
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let store = Self::in_memory()?;
        store.load_file(path)?;
        Ok(store)
    }

    /// Load an RDF file into the default graph.
    pub fn load_file(&self, path: &Path) -> StoreResult<()> {
        let format = format_for(path)?;
        let file = std::fs::File::open(path).map_err(|e| StoreError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.store
            .load_from_reader(format, std::io::BufReader::new(file))
            .map_err(|e| StoreError::Load {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        tracing::info!(path = %path.display(), triples = self.len().unwrap_or(0), "loaded RDF data");
        Ok(())
    }

    /// Load RDF text in the given format into the default graph.
    pub fn load_str(&self, data: &str, format: RdfFormat) -> StoreResult<()> {
        self.store
            .load_from_reader(format, data.as_bytes())
            .map_err(|e| StoreError::Load {
                path: "<inline>".into(),
                message: e.to_string(),
            })
    }

    /// Number of triples in the store.
    pub fn len(&self) -> StoreResult<usize> {
        self.store.len().map_err(|e| StoreError::Protocol {
            message: format!("failed to count triples: {e}"),
        })
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        self.len().map(|n| n == 0)
    }
}

fn format_for(path: &Path) -> StoreResult<RdfFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "ttl" | "turtle" => Ok(RdfFormat::Turtle),
        "nt" => Ok(RdfFormat::NTriples),
        "rdf" | "owl" | "xml" => Ok(RdfFormat::RdfXml),
        other => Err(StoreError::Load {
            path: path.display().to_string(),
            message: format!("unsupported RDF file extension \"{other}\""),
        }),
    }
}

fn term_value(term: &Term) -> Value {
    match term {
        Term::NamedNode(node) => Value::Reference {
            iri: node.as_str().to_string(),
        },
        Term::BlankNode(node) => Value::Reference {
            iri: format!("_:{}", node.as_str()),
        },
        Term::Literal(literal) => Value::literal(
            literal.value(),
            Some(literal.datatype().as_str()),
            literal.language(),
        ),
        #[allow(unreachable_patterns)]
        other => Value::Other {
            value: other.to_string(),
            datatype: "rdf:Triple".into(),
        },
    }
}

impl QueryExecutor for EmbeddedStore {
    fn execute(&self, query: &str) -> StoreResult<ResultSet> {
        let parsed = Query::parse(query, None).map_err(|e| StoreError::Rejected {
            status: 400,
            message: e.to_string(),
        })?;
        let results = self.store.query(parsed).map_err(|e| StoreError::Server {
            status: 500,
            message: e.to_string(),
        })?;

        match results {
            QueryResults::Solutions(solutions) => {
                let variables: Vec<String> = solutions
                    .variables()
                    .iter()
                    .map(|v| v.as_str().to_string())
                    .collect();
                let mut bindings = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| StoreError::Server {
                        status: 500,
                        message: format!("solution error: {e}"),
                    })?;
                    let binding: Binding = solution
                        .iter()
                        .map(|(var, term)| (var.as_str().to_string(), term_value(term)))
                        .collect();
                    bindings.push(binding);
                }
                Ok(ResultSet::new(variables, bindings))
            }
            QueryResults::Boolean(b) => Ok(ResultSet::boolean(b)),
            QueryResults::Graph(_) => Err(StoreError::Rejected {
                status: 400,
                message: "CONSTRUCT/DESCRIBE queries are not supported; use SELECT or ASK".into(),
            }),
        }
    }
}

impl std::fmt::Debug for EmbeddedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedStore").finish_non_exhaustive()
    }
}
