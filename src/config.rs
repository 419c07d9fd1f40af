//! Configuration: one immutable value built at startup and handed to each
//! component at construction.
//!
//! Persisted as TOML. Every field has a default matching the reference
//! deployment (LM Studio on `localhost:1234`, GraphDB on `localhost:7200`),
//! so an empty file is a valid configuration. Environment overrides are applied
//! only by the binary through [`KgaConfig::apply_env`]; library code never
//! reads process state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::generator::fallback::FallbackPattern;
use crate::llm::{LlmProvider, RetryPolicy};

/// Complete configuration for a pipeline instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KgaConfig {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub ontology: OntologyConfig,
    pub generation: GenerationConfig,
    pub answer: AnswerConfig,
}

/// Completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Base URL. For OpenAI-compatible servers this includes the `/v1` suffix.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAiCompatible,
            endpoint: "http://localhost:1234/v1".into(),
            model: "Meta-Llama-3.1-8B-Instruct-GGUF".into(),
            temperature: 0.1,
            max_tokens: 2000,
            timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

/// Triple store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SPARQL endpoint of the repository.
    pub endpoint: String,
    pub timeout_secs: u64,
    /// When set, the RDF file is loaded into an embedded store and queried
    /// locally instead of `endpoint`.
    pub data_file: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:7200/repositories/horse-knowledge-graph".into(),
            timeout_secs: 60,
            data_file: None,
        }
    }
}

/// Ontology descriptor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OntologyConfig {
    /// Namespace IRI of the ontology classes and properties.
    pub namespace: String,
    /// SPARQL prefix bound to `namespace`.
    pub prefix: String,
    /// Optional TOML descriptor replacing the built-in equestrian ontology.
    pub file: Option<PathBuf>,
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            namespace: "http://www.semanticweb.org/noamaadra/ontologies/2024/2/Horses#".into(),
            prefix: "horses".into(),
            file: None,
        }
    }
}

/// A named fallback matcher as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPatternSpec {
    pub name: String,
    /// Regex matching from the start of the query through the opening brace
    /// of its `WHERE` block.
    pub regex: String,
}

/// Query generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Ordered fallback matchers, most specific first.
    pub fallback_patterns: Vec<FallbackPatternSpec>,
    /// `LIMIT` of the last-resort default query.
    pub default_limit: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            fallback_patterns: vec![
                FallbackPatternSpec {
                    name: "prefixed-select".into(),
                    regex: r"(?is)PREFIX\s+(?:[A-Za-z_][\w.-]*)?\s*:\s*<[^<>\s]*>.*?SELECT\b.*?WHERE\s*\{"
                        .into(),
                },
                FallbackPatternSpec {
                    name: "bare-select".into(),
                    regex: r"(?is)SELECT\b.*?WHERE\s*\{".into(),
                },
            ],
            default_limit: 10,
        }
    }
}

impl GenerationConfig {
    /// Compile the configured fallback patterns, preserving their order.
    pub fn compile_patterns(&self) -> ConfigResult<Vec<FallbackPattern>> {
        self.fallback_patterns
            .iter()
            .map(|p| FallbackPattern::new(&p.name, &p.regex))
            .collect()
    }
}

/// Language used for prompts and canned answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "fr")]
    French,
}

impl std::str::FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Self::English),
            "fr" | "french" | "francais" | "français" => Ok(Self::French),
            other => Err(ConfigError::Invalid {
                message: format!("unsupported language \"{other}\" (expected \"en\" or \"fr\")"),
            }),
        }
    }
}

/// Answer synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerConfig {
    pub language: Language,
    /// Characters of context quoted in the canned answer when synthesis fails.
    pub excerpt_chars: usize,
    /// Maximum result rows rendered into the synthesis context.
    pub max_context_rows: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            language: Language::English,
            excerpt_chars: 200,
            max_context_rows: 50,
        }
    }
}

impl KgaConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: "<memory>".into(),
            message: e.to_string(),
        })
    }

    /// Apply `KGA_*` overrides from the given variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KGA_LLM_PROVIDER") {
            self.llm.provider = v.parse()?;
        }
        if let Some(v) = lookup("KGA_LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Some(v) = lookup("KGA_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("KGA_STORE_ENDPOINT") {
            self.store.endpoint = v;
        }
        if let Some(v) = lookup("KGA_LANGUAGE") {
            self.answer.language = v.parse()?;
        }
        Ok(())
    }

    /// Check the configuration for values that would make the pipeline unusable.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut problems = Vec::new();

        if self.llm.endpoint.trim().is_empty() {
            problems.push("llm.endpoint is not set");
        }
        if self.llm.model.trim().is_empty() {
            problems.push("llm.model is not set");
        }
        if self.llm.retry.max_attempts == 0 {
            problems.push("llm.retry.max_attempts must be at least 1");
        }
        if !(0.0..=RetryPolicy::MAX_MULTIPLIER).contains(&self.llm.retry.multiplier) {
            problems.push("llm.retry.multiplier must be between 0 and 10");
        }
        if self.llm.retry.backoff_ms > RetryPolicy::MAX_DELAY_MS {
            problems.push("llm.retry.backoff_ms must not exceed 60000");
        }
        if self.store.data_file.is_none() && self.store.endpoint.trim().is_empty() {
            problems.push("store.endpoint is not set");
        }
        if self.ontology.namespace.trim().is_empty() {
            problems.push("ontology.namespace is not set");
        }
        if self.generation.default_limit == 0 {
            problems.push("generation.default_limit must be at least 1");
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid {
                message: problems.join("; "),
            });
        }

        self.generation.compile_patterns().map(|_| ())
    }
}
