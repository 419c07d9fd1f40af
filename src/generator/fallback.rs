//! Pattern-based query extraction for completions that are not valid JSON.
//!
//! Each [`FallbackPattern`] is a regex that locates the *start* of a query up
//! to the opening brace of its `WHERE` block. The block itself is closed by
//! brace counting rather than by the regex, so nested `OPTIONAL { … }` groups
//! survive, and trailing solution modifiers (`ORDER BY`, `LIMIT`, …) are kept.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ConfigError, ConfigResult};
use crate::ontology::Prefix;

/// Solution modifiers that may follow the closing brace. Separators may be real
/// whitespace or the literal `\n` / `\t` escapes found inside JSON strings.
static RE_MODIFIERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^(?:(?:\s|\\[nt])*(?:GROUP\s+BY|ORDER\s+BY|HAVING|LIMIT|OFFSET)\b[^\r\n{}"\\]*)*"#,
    )
    .unwrap()
});

/// A named query-start matcher.
#[derive(Debug, Clone)]
pub struct FallbackPattern {
    name: String,
    start: Regex,
}

impl FallbackPattern {
    /// Compile a pattern.
    pub fn new(name: &str, regex: &str) -> ConfigResult<Self> {
        let start = Regex::new(regex).map_err(|e| ConfigError::Pattern {
            pattern: regex.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            start,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Find the first query in `text` whose start matches this pattern and
    /// whose outer block is balanced. Returns the raw (still escaped) span.
    pub fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.start.find_iter(text).find_map(|m| {
            let open = if m.as_str().ends_with('{') {
                m.end() - 1
            } else {
                text[m.end()..].find('{').map(|offset| m.end() + offset)?
            };
            let close = matching_brace(text, open)?;
            let tail = &text[close + 1..];
            let modifiers = RE_MODIFIERS.find(tail).map_or(0, |t| t.end());
            let span = text[m.start()..close + 1 + modifiers].trim_end();
            Some(span)
        })
    }
}

/// Index of the `}` closing the `{` at `open`, if the block is balanced.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, ch) in text[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Turn the literal `\n` and `\t` escapes models put inside query strings into
/// real newlines and tabs.
pub fn unescape(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}

/// Last-resort query: an unfiltered, bounded sample of the default graph.
pub fn default_query(prefix: &Prefix, limit: usize) -> String {
    const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

    let mut query = format!("PREFIX {}: <{}>\n", prefix.name, prefix.iri);
    if prefix.name != "rdf" {
        let _ = writeln!(query, "PREFIX rdf: <{RDF}>");
    }
    let _ = write!(
        query,
        "\nSELECT ?subject ?predicate ?object\n\
         WHERE {{\n  ?subject ?predicate ?object .\n}}\n\
         LIMIT {limit}"
    );
    query
}
