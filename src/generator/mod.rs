//! Question → SPARQL translation.
//!
//! The generator builds one prompt from the ontology descriptor and the user's
//! question, asks the model once, and parses the reply. Parsing never fails:
//! a malformed reply degrades through the fallback patterns to the default
//! query, and the path taken is recorded in [`GeneratedQuery::origin`].

pub mod fallback;
mod parse;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Language;
use crate::llm::Completion;
use crate::ontology::OntologyDescriptor;

use self::fallback::{FallbackPattern, default_query, unescape};

/// How a query was obtained from the model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOrigin {
    /// The reply was a well-formed JSON object.
    Parsed,
    /// The named fallback pattern found a query in the raw reply.
    Fallback { pattern: String },
    /// Nothing usable was found; the default sample query is used.
    Default,
}

/// A query produced for one question. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedQuery {
    pub query_text: String,
    pub entities_used: BTreeSet<String>,
    pub relations_used: BTreeSet<String>,
    pub explanation: String,
    pub origin: QueryOrigin,
}

impl GeneratedQuery {
    /// Whether the query came from anything other than a clean parse.
    pub fn is_degraded(&self) -> bool {
        self.origin != QueryOrigin::Parsed
    }
}

/// Turns questions into SPARQL queries with a language model.
pub struct QueryGenerator {
    ontology: Arc<OntologyDescriptor>,
    completion: Arc<dyn Completion>,
    patterns: Vec<FallbackPattern>,
    default_limit: usize,
    language: Language,
}

impl QueryGenerator {
    pub fn new(
        ontology: Arc<OntologyDescriptor>,
        completion: Arc<dyn Completion>,
        patterns: Vec<FallbackPattern>,
        default_limit: usize,
        language: Language,
    ) -> Self {
        Self {
            ontology,
            completion,
            patterns,
            default_limit: default_limit.max(1),
            language,
        }
    }

    pub fn ontology(&self) -> &OntologyDescriptor {
        &self.ontology
    }

    /// The generation prompt for `question`.
    pub fn prompt(&self, question: &str) -> String {
        let prefix = self.ontology.primary_prefix();
        format!(
            "You are an expert in SPARQL and in the ontology described below. \
             Your task is to translate a natural-language question into a correct \
             SPARQL query over this ontology.\n\n\
             {description}\n\n\
             ---\n\n\
             QUESTION TO TRANSLATE: \"{question}\"\n\n\
             INSTRUCTIONS:\n\
             1. Identify the classes, properties and relations the question needs.\n\
             2. Follow the patterns shown in the examples above.\n\
             3. Use the `{prefix_name}:` prefix for every ontology term.\n\
             4. Use OPTIONAL for properties that may be missing.\n\
             5. Never use a GRAPH clause.\n\
             6. Start the query with these declarations:\n{prefixes}\n\n\
             OUTPUT FORMAT:\n\
             Reply with a single JSON object and nothing else: no prose before or \
             after it and no Markdown code fences. The object has exactly these \
             fields:\n\
             {{\n  \
               \"query_text\": \"the complete SPARQL query, lines separated by \\n\",\n  \
               \"entities_used\": [\"the ontology classes used\"],\n  \
               \"relations_used\": [\"the ontology properties used\"],\n  \
               \"explanation\": \"one sentence describing what the query retrieves\"\n\
             }}",
            description = self.ontology.describe(),
            prefix_name = prefix.name,
            prefixes = self.ontology.prefix_block(),
        )
    }

    /// Generate a query for `question`. Never fails.
    pub fn generate(&self, question: &str) -> GeneratedQuery {
        let prompt = self.prompt(question);
        let raw = match self.completion.complete(&prompt, None) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!("generation returned an empty completion");
                String::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "generation completion failed");
                String::new()
            }
        };

        let query = self.parse_completion(&raw);
        match &query.origin {
            QueryOrigin::Parsed => tracing::debug!(
                entities = query.entities_used.len(),
                relations = query.relations_used.len(),
                "parsed generated query"
            ),
            QueryOrigin::Fallback { pattern } => {
                tracing::warn!(pattern = %pattern, "reply was not valid JSON, used fallback pattern")
            }
            QueryOrigin::Default => {
                tracing::warn!("no query found in reply, using default query")
            }
        }
        query
    }

    /// Parse a raw completion into a query. Pure and deterministic.
    pub fn parse_completion(&self, raw: &str) -> GeneratedQuery {
        let structured = parse::parse_structured(raw)
            .filter(|reply| reply.query_text.as_deref().is_some_and(|q| !q.trim().is_empty()));
        if let Some(reply) = structured {
            return GeneratedQuery {
                query_text: reply.query_text.unwrap_or_default(),
                entities_used: reply.entities_used,
                relations_used: reply.relations_used,
                explanation: reply
                    .explanation
                    .unwrap_or_else(|| self.placeholder_explanation().to_string()),
                origin: QueryOrigin::Parsed,
            };
        }

        for pattern in &self.patterns {
            if let Some(span) = pattern.find(raw) {
                return GeneratedQuery {
                    query_text: unescape(span),
                    entities_used: BTreeSet::new(),
                    relations_used: BTreeSet::new(),
                    explanation: self.fallback_explanation(pattern.name()),
                    origin: QueryOrigin::Fallback {
                        pattern: pattern.name().to_string(),
                    },
                };
            }
        }

        GeneratedQuery {
            query_text: default_query(self.ontology.primary_prefix(), self.default_limit),
            entities_used: BTreeSet::new(),
            relations_used: BTreeSet::new(),
            explanation: self.default_explanation().to_string(),
            origin: QueryOrigin::Default,
        }
    }

    fn placeholder_explanation(&self) -> &'static str {
        match self.language {
            Language::English => "Generated query",
            Language::French => "Requête générée",
        }
    }

    fn fallback_explanation(&self, pattern: &str) -> String {
        match self.language {
            Language::English => {
                format!("Query extracted from an unstructured reply (pattern \"{pattern}\")")
            }
            Language::French => {
                format!("Requête extraite d'une réponse non structurée (motif \"{pattern}\")")
            }
        }
    }

    fn default_explanation(&self) -> &'static str {
        match self.language {
            Language::English => "Default query: no query could be extracted from the reply",
            Language::French => "Requête par défaut : aucune requête n'a pu être extraite",
        }
    }
}

impl std::fmt::Debug for QueryGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryGenerator")
            .field("patterns", &self.patterns.len())
            .field("default_limit", &self.default_limit)
            .field("language", &self.language)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::config::GenerationConfig;
    use crate::llm::LlmError;

    const NS: &str = "http://www.semanticweb.org/noamaadra/ontologies/2024/2/Horses#";

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl Completion for Scripted {
        fn complete(&self, prompt: &str, _system: Option<&str>) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn generator_with(completion: Arc<dyn Completion>, language: Language) -> QueryGenerator {
        QueryGenerator::new(
            Arc::new(OntologyDescriptor::equestrian(NS, "horses")),
            completion,
            GenerationConfig::default().compile_patterns().unwrap(),
            10,
            language,
        )
    }

    fn generator() -> QueryGenerator {
        generator_with(Arc::new(Scripted::new(vec![])), Language::English)
    }

    #[test]
    fn prompt_contains_ontology_question_and_format() {
        let g = generator();
        let prompt = g.prompt("Which horses compete in dressage?");
        assert!(prompt.contains("EXAMPLE 1:"));
        assert!(prompt.contains("QUESTION TO TRANSLATE: \"Which horses compete in dressage?\""));
        assert!(prompt.contains(&format!("PREFIX horses: <{NS}>")));
        assert!(prompt.contains("\"query_text\""));
        assert!(prompt.contains("\"relations_used\""));
        assert!(prompt.contains("no Markdown code fences"));
    }

    #[test]
    fn structured_reply_is_parsed() {
        let q = generator().parse_completion(
            r#"{"query_text": "SELECT ?h WHERE {\\n  ?h a horses:Horse .\\n}", "entities_used": ["Horse"], "relations_used": [], "explanation": "All horses"}"#,
        );
        assert_eq!(q.origin, QueryOrigin::Parsed);
        assert_eq!(q.query_text, "SELECT ?h WHERE {\n  ?h a horses:Horse .\n}");
        assert!(q.entities_used.contains("Horse"));
        assert_eq!(q.explanation, "All horses");
        assert!(!q.is_degraded());
    }

    #[test]
    fn missing_explanation_gets_placeholder() {
        let q = generator().parse_completion(r#"{"query_text": "ASK { ?s ?p ?o }"}"#);
        assert_eq!(q.explanation, "Generated query");

        let fr = generator_with(Arc::new(Scripted::new(vec![])), Language::French)
            .parse_completion(r#"{"query_text": "ASK { ?s ?p ?o }"}"#);
        assert_eq!(fr.explanation, "Requête générée");
    }

    #[test]
    fn blank_query_text_falls_through() {
        let q = generator().parse_completion(r#"{"query_text": "   ", "entities_used": ["Horse"]}"#);
        assert_eq!(q.origin, QueryOrigin::Default);
        assert!(q.entities_used.is_empty());
    }

    #[test]
    fn prose_reply_uses_fallback_pattern() {
        let raw = "Here is the query you asked for:\n\n\
                   PREFIX horses: <http://x/#>\n\
                   SELECT ?t WHERE { ?t a horses:Training . OPTIONAL { ?t horses:Frequency ?f } }\n\n\
                   It lists trainings.";
        let q = generator().parse_completion(raw);
        assert_eq!(
            q.origin,
            QueryOrigin::Fallback {
                pattern: "prefixed-select".into()
            }
        );
        assert!(q.query_text.starts_with("PREFIX horses:"));
        assert!(q.query_text.ends_with("?f } }"));
        assert!(q.explanation.contains("prefixed-select"));
        assert!(q.entities_used.is_empty());
        assert!(q.relations_used.is_empty());
    }

    #[test]
    fn truncated_json_uses_fallback_and_unescapes() {
        let raw = r#"{"query_text": "SELECT ?h WHERE {\n  ?h a horses:Horse .\n}", "entities_used": ["Hor"#;
        let q = generator().parse_completion(raw);
        assert_eq!(
            q.origin,
            QueryOrigin::Fallback {
                pattern: "bare-select".into()
            }
        );
        assert_eq!(q.query_text, "SELECT ?h WHERE {\n  ?h a horses:Horse .\n}");
    }

    #[test]
    fn unparseable_reply_yields_stable_default() {
        let g = generator();
        let a = g.parse_completion("I'm sorry, I can't help with that.");
        let b = g.parse_completion("");
        assert_eq!(a.origin, QueryOrigin::Default);
        assert_eq!(a, b);
        assert!(a.query_text.contains("LIMIT 10"));
        assert!(a.query_text.contains(&format!("PREFIX horses: <{NS}>")));
    }

    #[test]
    fn generate_sends_prompt_once_and_parses() {
        let scripted = Arc::new(Scripted::new(vec![Ok(
            "```json\n{\"query_text\": \"SELECT ?e WHERE { ?e a horses:SportingEvent }\", \"entities_used\": [\"SportingEvent\"]}\n```"
                .into(),
        )]));
        let g = generator_with(scripted.clone(), Language::English);
        let q = g.generate("Which events are there?");
        assert_eq!(q.origin, QueryOrigin::Parsed);
        assert_eq!(q.query_text, "SELECT ?e WHERE { ?e a horses:SportingEvent }");
        assert_eq!(scripted.prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn generate_degrades_on_completion_error() {
        let scripted = Arc::new(Scripted::new(vec![Err(LlmError::Timeout { timeout_secs: 60 })]));
        let g = generator_with(scripted, Language::English);
        let q = g.generate("Anything?");
        assert_eq!(q.origin, QueryOrigin::Default);
        assert_eq!(q, g.parse_completion(""));
    }

    #[test]
    fn origin_serializes_with_kind_tag() {
        let json = serde_json::to_value(QueryOrigin::Fallback {
            pattern: "bare-select".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "fallback");
        assert_eq!(json["pattern"], "bare-select");
        assert_eq!(serde_json::to_value(QueryOrigin::Default).unwrap()["kind"], "default");
    }
}
