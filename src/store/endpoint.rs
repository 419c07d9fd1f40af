//! SPARQL 1.1 protocol client.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{StoreError, StoreResult};
use crate::llm::transport_timed_out;

use super::{Binding, QueryExecutor, ResultSet, Value};

/// A remote SPARQL endpoint (GraphDB, Fuseki, Oxigraph server, ...).
#[derive(Debug, Clone)]
pub struct SparqlEndpoint {
    url: String,
    timeout_secs: u64,
}

impl SparqlEndpoint {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            url: url.into(),
            timeout_secs,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of triples in the default graph.
    pub fn triple_count(&self) -> StoreResult<usize> {
        let rs = self.execute("SELECT (COUNT(*) AS ?count) WHERE { ?s ?p ?o }")?;
        Ok(rs
            .bindings
            .first()
            .and_then(|b| b.get("count"))
            .and_then(|v| match v {
                Value::Number { value } => Some(*value as usize),
                other => other.lexical().parse().ok(),
            })
            .unwrap_or(0))
    }

    fn map_error(&self, err: ureq::Error) -> StoreError {
        match err {
            ureq::Error::Status(400, resp) => StoreError::Rejected {
                status: 400,
                message: body_excerpt(resp),
            },
            ureq::Error::Status(status, resp) => StoreError::Server {
                status,
                message: body_excerpt(resp),
            },
            ureq::Error::Transport(transport) => {
                if transport_timed_out(&transport) {
                    StoreError::Timeout {
                        endpoint: self.url.clone(),
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    StoreError::Connection {
                        endpoint: self.url.clone(),
                        message: transport.to_string(),
                    }
                }
            }
        }
    }
}

fn body_excerpt(resp: ureq::Response) -> String {
    const MAX: usize = 500;
    let body = resp.into_string().unwrap_or_default();
    let body = body.trim();
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

impl QueryExecutor for SparqlEndpoint {
    fn execute(&self, query: &str) -> StoreResult<ResultSet> {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build();

        tracing::debug!(endpoint = %self.url, "executing SPARQL query");
        let resp = agent
            .post(&self.url)
            .set("Content-Type", "application/sparql-query")
            .set("Accept", "application/sparql-results+json")
            .send_string(query)
            .map_err(|e| self.map_error(e))?;

        let body = resp.into_string().map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                StoreError::Timeout {
                    endpoint: self.url.clone(),
                    timeout_secs: self.timeout_secs,
                }
            } else {
                StoreError::Protocol {
                    message: format!("failed to read response body: {e}"),
                }
            }
        })?;

        parse_results_json(&body)
    }
}

/// `application/sparql-results+json` document.
#[derive(Debug, Deserialize)]
struct ResultsDocument {
    #[serde(default)]
    head: Head,
    results: Option<Results>,
    boolean: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct Head {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Results {
    #[serde(default)]
    bindings: Vec<std::collections::BTreeMap<String, Term>>,
}

#[derive(Debug, Deserialize)]
struct Term {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(rename = "xml:lang")]
    lang: Option<String>,
    datatype: Option<String>,
}

impl Term {
    fn into_value(self) -> Value {
        match self.kind.as_str() {
            "uri" => Value::Reference { iri: self.value },
            "bnode" => Value::Reference {
                iri: format!("_:{}", self.value),
            },
            _ => Value::literal(&self.value, self.datatype.as_deref(), self.lang.as_deref()),
        }
    }
}

/// Parse a W3C SPARQL JSON results document (SELECT or ASK).
pub(crate) fn parse_results_json(body: &str) -> StoreResult<ResultSet> {
    let doc: ResultsDocument = serde_json::from_str(body).map_err(|e| StoreError::Protocol {
        message: format!("invalid SPARQL JSON results: {e}"),
    })?;

    if let Some(value) = doc.boolean {
        return Ok(ResultSet::boolean(value));
    }
    let results = doc.results.ok_or_else(|| StoreError::Protocol {
        message: "response has neither `results` nor `boolean`".into(),
    })?;

    let bindings = results
        .bindings
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(var, term)| (var, term.into_value()))
                .collect::<Binding>()
        })
        .collect();
    Ok(ResultSet::new(doc.head.vars, bindings))
}
