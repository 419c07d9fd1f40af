//! Query execution against a triple store.
//!
//! Two executors are provided: [`SparqlEndpoint`] talks to a remote store over
//! the SPARQL 1.1 protocol, [`EmbeddedStore`] evaluates queries against an
//! in-process oxigraph store loaded from an RDF file. Both return the same
//! [`ResultSet`], with every bound term converted to a typed [`Value`].

mod embedded;
mod endpoint;

pub use embedded::EmbeddedStore;
pub use endpoint::SparqlEndpoint;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::error::StoreResult;

const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

/// Executes SPARQL queries.
pub trait QueryExecutor: Send + Sync {
    /// Run `query` and return its bindings. A successful query with no
    /// solutions is an empty result set, not an error.
    fn execute(&self, query: &str) -> StoreResult<ResultSet>;
}

/// A bound RDF term.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    /// An IRI or a blank node (`_:` prefixed).
    Reference { iri: String },
    /// A plain, `xsd:string` or language-tagged literal.
    Text {
        value: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Number { value: f64 },
    Boolean { value: bool },
    /// `xsd:date`, `xsd:dateTime` and friends, kept in lexical form.
    Date { value: String },
    /// Any other typed literal.
    Other { value: String, datatype: String },
}

impl Value {
    /// Convert an RDF literal from its lexical form and datatype.
    pub fn literal(lexical: &str, datatype: Option<&str>, language: Option<&str>) -> Self {
        let text = || Value::Text {
            value: lexical.to_string(),
            language: language.map(str::to_string),
        };

        let Some(datatype) = datatype.filter(|dt| *dt != RDF_LANG_STRING) else {
            return text();
        };
        let Some(local) = datatype.strip_prefix(XSD) else {
            return Value::Other {
                value: lexical.to_string(),
                datatype: datatype.to_string(),
            };
        };

        match local {
            "string" | "normalizedString" | "token" | "anyURI" => text(),
            "integer" | "int" | "long" | "short" | "byte" | "decimal" | "double" | "float"
            | "nonNegativeInteger" | "positiveInteger" | "negativeInteger"
            | "nonPositiveInteger" | "unsignedInt" | "unsignedLong" | "unsignedShort"
            | "unsignedByte" => match lexical.trim().parse::<f64>() {
                Ok(value) => Value::Number { value },
                Err(_) => Value::Other {
                    value: lexical.to_string(),
                    datatype: datatype.to_string(),
                },
            },
            "boolean" => match lexical.trim() {
                "true" | "1" => Value::Boolean { value: true },
                "false" | "0" => Value::Boolean { value: false },
                _ => Value::Other {
                    value: lexical.to_string(),
                    datatype: datatype.to_string(),
                },
            },
            "date" | "dateTime" | "dateTimeStamp" | "time" | "gYear" | "gYearMonth" => {
                Value::Date {
                    value: lexical.to_string(),
                }
            }
            _ => Value::Other {
                value: lexical.to_string(),
                datatype: datatype.to_string(),
            },
        }
    }

    /// Full lexical form: the complete IRI for references.
    pub fn lexical(&self) -> String {
        match self {
            Value::Reference { iri } => iri.clone(),
            Value::Text { value, .. } | Value::Date { value } | Value::Other { value, .. } => {
                value.clone()
            }
            Value::Number { value } => format_number(*value),
            Value::Boolean { value } => value.to_string(),
        }
    }
}

/// Short human form: references are reduced to their local name.
impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Reference { iri } => f.write_str(local_name(iri)),
            Value::Text {
                value,
                language: Some(lang),
            } => write!(f, "{value} ({lang})"),
            other => f.write_str(&other.lexical()),
        }
    }
}

/// The part of an IRI after the last `#` or `/`.
pub fn local_name(iri: &str) -> &str {
    match iri.rfind(|c: char| c == '#' || c == '/') {
        Some(pos) if pos + 1 < iri.len() => &iri[pos + 1..],
        _ => iri,
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// One solution: variable name → bound value. Unbound variables are absent.
pub type Binding = BTreeMap<String, Value>;

/// Ordered query solutions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    /// Projected variables, in query order.
    pub variables: Vec<String>,
    pub bindings: Vec<Binding>,
}

impl ResultSet {
    pub fn new(variables: Vec<String>, bindings: Vec<Binding>) -> Self {
        Self {
            variables,
            bindings,
        }
    }

    /// Result of an `ASK` query: one binding of `result`.
    pub fn boolean(value: bool) -> Self {
        Self {
            variables: vec!["result".into()],
            bindings: vec![Binding::from([(
                "result".to_string(),
                Value::Boolean { value },
            )])],
        }
    }

    pub fn count(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Unformatted listing of every binding with full lexical values, used as
    /// context when the formatter fails.
    pub fn raw_dump(&self) -> String {
        let mut out = String::new();
        for (i, binding) in self.bindings.iter().enumerate() {
            let fields: Vec<String> = binding
                .iter()
                .map(|(var, value)| format!("{var}={}", value.lexical()))
                .collect();
            let _ = writeln!(out, "{}: {{{}}}", i + 1, fields.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://www.semanticweb.org/noamaadra/ontologies/2024/2/Horses#";

    #[test]
    fn literal_typing() {
        assert_eq!(
            Value::literal("4", Some("http://www.w3.org/2001/XMLSchema#integer"), None),
            Value::Number { value: 4.0 }
        );
        assert_eq!(
            Value::literal("true", Some("http://www.w3.org/2001/XMLSchema#boolean"), None),
            Value::Boolean { value: true }
        );
        assert_eq!(
            Value::literal("2026-05-01", Some("http://www.w3.org/2001/XMLSchema#date"), None),
            Value::Date {
                value: "2026-05-01".into()
            }
        );
        assert_eq!(
            Value::literal("Dakota", None, None),
            Value::Text {
                value: "Dakota".into(),
                language: None
            }
        );
        assert_eq!(
            Value::literal("Alezan", Some(RDF_LANG_STRING), Some("fr")),
            Value::Text {
                value: "Alezan".into(),
                language: Some("fr".into())
            }
        );
    }

    #[test]
    fn unparseable_number_is_other() {
        let v = Value::literal("lots", Some("http://www.w3.org/2001/XMLSchema#integer"), None);
        assert!(matches!(v, Value::Other { .. }));
    }

    #[test]
    fn custom_datatype_is_other() {
        let v = Value::literal("1.62m", Some("http://units.example/length"), None);
        assert_eq!(
            v,
            Value::Other {
                value: "1.62m".into(),
                datatype: "http://units.example/length".into()
            }
        );
    }

    #[test]
    fn display_shortens_references() {
        let v = Value::Reference {
            iri: format!("{NS}Horse1"),
        };
        assert_eq!(v.to_string(), "Horse1");
        assert_eq!(v.lexical(), format!("{NS}Horse1"));
        assert_eq!(local_name("http://example.org/a/b"), "b");
        assert_eq!(local_name("http://example.org/a/"), "http://example.org/a/");
        assert_eq!(local_name("_:b0"), "_:b0");
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(Value::Number { value: 3.0 }.to_string(), "3");
        assert_eq!(Value::Number { value: 1.5 }.to_string(), "1.5");
    }

    #[test]
    fn raw_dump_lists_every_binding() {
        let rs = ResultSet::new(
            vec!["horse".into(), "name".into()],
            vec![
                Binding::from([
                    (
                        "horse".to_string(),
                        Value::Reference {
                            iri: format!("{NS}Horse1"),
                        },
                    ),
                    ("name".to_string(), Value::literal("Dakota", None, None)),
                ]),
                Binding::from([(
                    "horse".to_string(),
                    Value::Reference {
                        iri: format!("{NS}Horse2"),
                    },
                )]),
            ],
        );
        let dump = rs.raw_dump();
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.contains(&format!("horse={NS}Horse1, name=Dakota")));
        assert_eq!(rs.count(), 2);
    }

    #[test]
    fn value_serializes_with_type_tag() {
        let json = serde_json::to_value(Value::Number { value: 2.0 }).unwrap();
        assert_eq!(json["type"], "number");
        assert_eq!(json["value"], 2.0);
    }

    #[test]
    fn boolean_result_set() {
        let rs = ResultSet::boolean(true);
        assert_eq!(rs.count(), 1);
        assert_eq!(rs.bindings[0]["result"], Value::Boolean { value: true });
    }
}
