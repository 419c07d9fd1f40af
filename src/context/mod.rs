//! Rendering of query results into the textual context given to the answer
//! synthesizer.

use std::fmt::Write as _;

use miette::Diagnostic;
use thiserror::Error;

use crate::store::ResultSet;

/// Errors from context formatting. The pipeline recovers from these by using
/// [`ResultSet::raw_dump`] instead.
#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("failed to format query results: {message}")]
    #[diagnostic(code(kga::context::format))]
    Format { message: String },
}

/// Renders a result set and the query explanation into prose context.
pub trait ContextFormatter: Send + Sync {
    fn format(&self, results: &ResultSet, explanation: &str) -> Result<String, ContextError>;
}

/// Default formatter: a header with the explanation and result count, then one
/// numbered block of `variable: value` lines per binding.
#[derive(Debug, Clone)]
pub struct ProseContextFormatter {
    max_rows: usize,
}

impl ProseContextFormatter {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
        }
    }
}

impl Default for ProseContextFormatter {
    fn default() -> Self {
        Self::new(50)
    }
}

impl ContextFormatter for ProseContextFormatter {
    fn format(&self, results: &ResultSet, explanation: &str) -> Result<String, ContextError> {
        let mut out = String::new();
        let fmt_err = |e: std::fmt::Error| ContextError::Format {
            message: e.to_string(),
        };

        writeln!(out, "Query: {}", explanation.trim()).map_err(fmt_err)?;
        writeln!(out, "Results found: {}", results.count()).map_err(fmt_err)?;
        if results.is_empty() {
            return Ok(out);
        }
        out.push('\n');

        for (i, binding) in results.bindings.iter().take(self.max_rows).enumerate() {
            writeln!(out, "Result {}:", i + 1).map_err(fmt_err)?;
            // Projection order first, then anything the store returned beyond it.
            let ordered = results
                .variables
                .iter()
                .filter_map(|var| binding.get(var).map(|v| (var.as_str(), v)))
                .chain(
                    binding
                        .iter()
                        .filter(|(var, _)| !results.variables.contains(var))
                        .map(|(var, v)| (var.as_str(), v)),
                );
            for (var, value) in ordered {
                writeln!(out, "  {var}: {value}").map_err(fmt_err)?;
            }
        }

        let hidden = results.count().saturating_sub(self.max_rows);
        if hidden > 0 {
            writeln!(out, "\n... and {hidden} more result(s) not shown").map_err(fmt_err)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Binding, Value};

    const NS: &str = "http://www.semanticweb.org/noamaadra/ontologies/2024/2/Horses#";

    fn horse_row(n: usize) -> Binding {
        Binding::from([
            (
                "horse".to_string(),
                Value::Reference {
                    iri: format!("{NS}Horse{n}"),
                },
            ),
            ("name".to_string(), Value::literal(&format!("Horse #{n}"), None, None)),
        ])
    }

    #[test]
    fn renders_header_and_rows() {
        let rs = ResultSet::new(vec!["horse".into(), "name".into()], vec![horse_row(1)]);
        let text = ProseContextFormatter::default()
            .format(&rs, "Lists every horse")
            .unwrap();
        assert!(text.starts_with("Query: Lists every horse\nResults found: 1\n"));
        assert!(text.contains("Result 1:\n  horse: Horse1\n  name: Horse #1\n"));
    }

    #[test]
    fn projection_order_is_kept() {
        let rs = ResultSet::new(vec!["name".into(), "horse".into()], vec![horse_row(1)]);
        let text = ProseContextFormatter::default().format(&rs, "q").unwrap();
        assert!(text.find("name:").unwrap() < text.find("horse:").unwrap());
    }

    #[test]
    fn empty_results_only_have_header() {
        let text = ProseContextFormatter::default()
            .format(&ResultSet::default(), "nothing")
            .unwrap();
        assert_eq!(text, "Query: nothing\nResults found: 0\n");
    }

    #[test]
    fn rows_beyond_limit_are_summarised() {
        let rs = ResultSet::new(
            vec!["horse".into(), "name".into()],
            (1..=5).map(horse_row).collect(),
        );
        let text = ProseContextFormatter::new(2).format(&rs, "q").unwrap();
        assert!(text.contains("Results found: 5"));
        assert!(text.contains("Result 2:"));
        assert!(!text.contains("Result 3:"));
        assert!(text.contains("... and 3 more result(s) not shown"));
    }
}
