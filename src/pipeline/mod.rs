//! Question-answering pipeline: generation → execution → context → synthesis.
//!
//! Each call to [`Pipeline::answer`] is one pass through the state machine in
//! [`state`]. Only a failed query execution ends the run early; the other
//! stages degrade instead (default query, raw context dump, canned answer) and
//! record how in the report. The pipeline holds no per-question state, so one
//! instance can serve many threads at once.

pub mod state;

use std::sync::Arc;

use serde::Serialize;

use crate::config::{AnswerConfig, KgaConfig, Language};
use crate::context::{ContextFormatter, ProseContextFormatter};
use crate::error::{ExecutionFailureKind, KgaResult};
use crate::generator::{GeneratedQuery, QueryGenerator};
use crate::llm::{Completion, CompletionClient};
use crate::ontology::{OntologyDescriptor, Prefix};
use crate::store::{EmbeddedStore, QueryExecutor, ResultSet, SparqlEndpoint};
use crate::synth::{AnswerSynthesizer, fallback_answer};

pub use self::state::{PipelineState, Stage};
use self::state::StateMachine;

/// How the context block was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextOrigin {
    Formatted,
    /// The formatter failed; the context is the raw binding dump.
    RawDump,
}

/// How the answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOrigin {
    Synthesized,
    /// Synthesis failed; the answer is the fixed-format fallback.
    Fallback,
}

/// Everything produced by a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerReport {
    pub question: String,
    pub generated_query: GeneratedQuery,
    pub result_count: usize,
    pub context: String,
    pub context_origin: ContextOrigin,
    pub answer: String,
    pub answer_origin: AnswerOrigin,
    pub result_set: ResultSet,
    /// States visited, in order.
    pub states: Vec<PipelineState>,
}

/// Artifacts of the stages completed before a failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartialArtifacts {
    pub generated_query: Option<GeneratedQuery>,
}

/// A run that stopped at `stage`.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub question: String,
    pub stage: Stage,
    pub kind: ExecutionFailureKind,
    /// User-facing cause, free of internal detail.
    pub message: String,
    /// Diagnostic text of the underlying error.
    pub detail: String,
    pub partial: PartialArtifacts,
    pub states: Vec<PipelineState>,
}

/// Result of one pipeline run: exactly one of success or failure.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Success(Box<AnswerReport>),
    Failure(Box<FailureReport>),
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn question(&self) -> &str {
        match self {
            Self::Success(r) => &r.question,
            Self::Failure(f) => &f.question,
        }
    }

    /// The generated query, when generation completed.
    pub fn generated_query(&self) -> Option<&GeneratedQuery> {
        match self {
            Self::Success(r) => Some(&r.generated_query),
            Self::Failure(f) => f.partial.generated_query.as_ref(),
        }
    }

    pub fn success(&self) -> Option<&AnswerReport> {
        match self {
            Self::Success(r) => Some(r),
            Self::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(f),
        }
    }

    /// Final state of the run.
    pub fn final_state(&self) -> PipelineState {
        match self {
            Self::Success(_) => PipelineState::Done,
            Self::Failure(f) => PipelineState::Failed(f.stage),
        }
    }
}

/// The question-answering pipeline.
pub struct Pipeline {
    generator: QueryGenerator,
    executor: Box<dyn QueryExecutor>,
    formatter: Box<dyn ContextFormatter>,
    synthesizer: AnswerSynthesizer,
    excerpt_chars: usize,
    language: Language,
}

impl Pipeline {
    pub fn new(
        generator: QueryGenerator,
        executor: Box<dyn QueryExecutor>,
        formatter: Box<dyn ContextFormatter>,
        synthesizer: AnswerSynthesizer,
        answer: &AnswerConfig,
    ) -> Self {
        Self {
            generator,
            executor,
            formatter,
            synthesizer,
            excerpt_chars: answer.excerpt_chars,
            language: answer.language,
        }
    }

    /// Build a pipeline from configuration: the HTTP completion client, the
    /// built-in or file-based ontology, and either the embedded store (when
    /// `store.data_file` is set) or the remote SPARQL endpoint.
    pub fn from_config(config: &KgaConfig) -> KgaResult<Self> {
        config.validate()?;

        let completion: Arc<dyn Completion> = Arc::new(CompletionClient::new(config.llm.clone()));
        let ontology = Arc::new(match &config.ontology.file {
            Some(path) => OntologyDescriptor::load(
                path,
                Prefix::new(&config.ontology.prefix, &config.ontology.namespace),
            )?,
            None => {
                OntologyDescriptor::equestrian(&config.ontology.namespace, &config.ontology.prefix)
            }
        });

        let executor: Box<dyn QueryExecutor> = match &config.store.data_file {
            Some(path) => Box::new(EmbeddedStore::from_file(path)?),
            None => Box::new(SparqlEndpoint::new(
                config.store.endpoint.clone(),
                config.store.timeout_secs,
            )),
        };

        let generator = QueryGenerator::new(
            ontology,
            Arc::clone(&completion),
            config.generation.compile_patterns()?,
            config.generation.default_limit,
            config.answer.language,
        );
        let synthesizer = AnswerSynthesizer::new(completion, config.answer.language);
        let formatter = Box::new(ProseContextFormatter::new(config.answer.max_context_rows));

        let store = match &config.store.data_file {
            Some(path) => path.display().to_string(),
            None => config.store.endpoint.clone(),
        };
        tracing::info!(model = %config.llm.model, store = %store, "pipeline ready");
        Ok(Self::new(generator, executor, formatter, synthesizer, &config.answer))
    }

    pub fn generator(&self) -> &QueryGenerator {
        &self.generator
    }

    /// Answer one question. Always returns exactly one outcome.
    pub fn answer(&self, question: &str) -> PipelineOutcome {
        let mut sm = StateMachine::new();
        tracing::info!(question, "answering question");

        sm.advance(PipelineState::Generating);
        let generated = self.generator.generate(question);

        sm.advance(PipelineState::Executing);
        let result_set = match self.executor.execute(&generated.query_text) {
            Ok(rs) => rs,
            Err(e) => {
                sm.advance(PipelineState::Failed(Stage::Execution));
                let kind = e.failure_kind();
                tracing::warn!(error = %e, %kind, "query execution failed");
                return PipelineOutcome::Failure(Box::new(FailureReport {
                    question: question.to_string(),
                    stage: Stage::Execution,
                    kind,
                    message: e.hint().to_string(),
                    detail: e.to_string(),
                    partial: PartialArtifacts {
                        generated_query: Some(generated),
                    },
                    states: sm.into_history(),
                }));
            }
        };
        let result_count = result_set.count();
        tracing::debug!(result_count, "query executed");

        sm.advance(PipelineState::BuildingContext);
        let (context, context_origin) =
            match self.formatter.format(&result_set, &generated.explanation) {
                Ok(context) => (context, ContextOrigin::Formatted),
                Err(e) => {
                    tracing::warn!(error = %e, "context formatting failed, using raw bindings");
                    (result_set.raw_dump(), ContextOrigin::RawDump)
                }
            };

        sm.advance(PipelineState::Synthesizing);
        let (answer, answer_origin) =
            match self.synthesizer.synthesize(question, &context, result_count) {
                Ok(answer) => (answer, AnswerOrigin::Synthesized),
                Err(e) => {
                    tracing::warn!(error = %e, "answer synthesis failed, using fallback answer");
                    (
                        fallback_answer(result_count, &context, self.excerpt_chars, self.language),
                        AnswerOrigin::Fallback,
                    )
                }
            };

        sm.advance(PipelineState::Done);
        PipelineOutcome::Success(Box::new(AnswerReport {
            question: question.to_string(),
            generated_query: generated,
            result_count,
            context,
            context_origin,
            answer,
            answer_origin,
            result_set,
            states: sm.into_history(),
        }))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("generator", &self.generator)
            .field("synthesizer", &self.synthesizer)
            .finish_non_exhaustive()
    }
}
