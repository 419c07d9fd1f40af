//! End-to-end tests for the question-answering pipeline.
//!
//! The completion service is scripted and queries run against an embedded
//! oxigraph store loaded from an inline Turtle fixture, so these tests need
//! neither a model server nor a remote triple store.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use oxigraph::io::RdfFormat;

use kg_answer::config::{AnswerConfig, GenerationConfig, Language};
use kg_answer::context::{ContextError, ContextFormatter, ProseContextFormatter};
use kg_answer::error::{ExecutionFailureKind, StoreError, StoreResult};
use kg_answer::generator::{QueryGenerator, QueryOrigin};
use kg_answer::llm::{Completion, LlmError};
use kg_answer::ontology::OntologyDescriptor;
use kg_answer::pipeline::{
    AnswerOrigin, ContextOrigin, Pipeline, PipelineOutcome, PipelineState, Stage,
};
use kg_answer::store::{EmbeddedStore, QueryExecutor, ResultSet, SparqlEndpoint};

const NS: &str = "http://www.semanticweb.org/noamaadra/ontologies/2024/2/Horses#";

const FIXTURE: &str = r#"
@prefix horses: <http://www.semanticweb.org/noamaadra/ontologies/2024/2/Horses#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .

horses:Horse1 a horses:Horse ;
    horses:hasName "Dakota" ;
    horses:isAttachedTo horses:Sensor123 .

horses:Horse2 a horses:Horse ;
    horses:hasName "Eclair" ;
    horses:isAttachedTo horses:Sensor456 .

horses:Sensor123 a horses:InertialSensors ;
    horses:hasSensorID "IMU-123" .

horses:Sensor456 a horses:InertialSensors ;
    horses:hasSensorID "IMU-456" .

horses:Training_Preparation_SJ_01 a horses:Training ;
    horses:Frequency "4"^^xsd:integer ;
    horses:Intensity "Moderate" .
"#;

const SENSOR_QUERY: &str = "PREFIX horses: <http://www.semanticweb.org/noamaadra/ontologies/2024/2/Horses#>
PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>

SELECT ?horse ?horseName ?sensor
WHERE {
  ?horse rdf:type horses:Horse .
  ?sensor rdf:type horses:InertialSensors .
  ?horse horses:isAttachedTo ?sensor .
  OPTIONAL { ?horse horses:hasName ?horseName . }
}";

const UNICORN_QUERY: &str = "PREFIX horses: <http://www.semanticweb.org/noamaadra/ontologies/2024/2/Horses#>
SELECT ?u WHERE { ?u a horses:Unicorn . }";

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Replies from a queue and records every call.
struct Scripted {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl Scripted {
    fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Completion for Scripted {
    fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), system.map(str::to_string)));
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(LlmError::RequestFailed {
                message: "script exhausted".into(),
            })
        })
    }
}

/// Stateless model: generation prompts get `query_reply`, synthesis prompts
/// (the ones with a system prompt) get `answer`.
struct RoleAware {
    query_reply: String,
    answer: String,
}

impl Completion for RoleAware {
    fn complete(&self, _prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        Ok(match system {
            None => self.query_reply.clone(),
            Some(_) => self.answer.clone(),
        })
    }
}

struct FailingExecutor(fn() -> StoreError);

impl QueryExecutor for FailingExecutor {
    fn execute(&self, _query: &str) -> StoreResult<ResultSet> {
        Err((self.0)())
    }
}

struct FailingFormatter;

impl ContextFormatter for FailingFormatter {
    fn format(&self, _results: &ResultSet, _explanation: &str) -> Result<String, ContextError> {
        Err(ContextError::Format {
            message: "template missing".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn store() -> EmbeddedStore {
    let store = EmbeddedStore::in_memory().unwrap();
    store.load_str(FIXTURE, RdfFormat::Turtle).unwrap();
    store
}

fn query_reply(query: &str, entities: &[&str], relations: &[&str]) -> String {
    serde_json::json!({
        "query_text": query,
        "entities_used": entities,
        "relations_used": relations,
        "explanation": "Finds the sensors attached to each horse",
    })
    .to_string()
}

fn build(
    completion: Arc<dyn Completion>,
    executor: Box<dyn QueryExecutor>,
    formatter: Box<dyn ContextFormatter>,
) -> Pipeline {
    let generator = QueryGenerator::new(
        Arc::new(OntologyDescriptor::equestrian(NS, "horses")),
        Arc::clone(&completion),
        GenerationConfig::default().compile_patterns().unwrap(),
        10,
        Language::English,
    );
    Pipeline::new(
        generator,
        executor,
        formatter,
        kg_answer::synth::AnswerSynthesizer::new(completion, Language::English),
        &AnswerConfig::default(),
    )
}

fn pipeline(completion: Arc<dyn Completion>) -> Pipeline {
    build(
        completion,
        Box::new(store()),
        Box::new(ProseContextFormatter::default()),
    )
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn sensors_attached_to_horses() {
    let model = Scripted::new(vec![
        Ok(query_reply(SENSOR_QUERY, &["Horse", "Sensor"], &["isAttachedTo"])),
        Ok("Dakota wears Sensor123 and Eclair wears Sensor456.".into()),
    ]);
    let outcome = pipeline(model.clone()).answer("What sensors are attached to the horses?");

    let report = outcome.success().expect("success");
    assert_eq!(report.result_count, 2);
    assert_eq!(report.result_set.count(), 2);
    assert_eq!(report.generated_query.origin, QueryOrigin::Parsed);
    assert_eq!(report.generated_query.query_text, SENSOR_QUERY);
    assert_eq!(report.generated_query.entities_used, set(&["Horse", "Sensor"]));
    assert_eq!(report.generated_query.relations_used, set(&["isAttachedTo"]));
    assert_eq!(report.answer, "Dakota wears Sensor123 and Eclair wears Sensor456.");
    assert_eq!(report.answer_origin, AnswerOrigin::Synthesized);
    assert_eq!(report.context_origin, ContextOrigin::Formatted);
    assert!(report.context.contains("Results found: 2"));
    assert!(report.context.contains("Sensor123"));
    assert_eq!(
        report.states,
        [
            PipelineState::Idle,
            PipelineState::Generating,
            PipelineState::Executing,
            PipelineState::BuildingContext,
            PipelineState::Synthesizing,
            PipelineState::Done,
        ]
    );

    // One generation call without system prompt, one synthesis call with it,
    // and the synthesis prompt carries the context.
    let calls = model.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].0.contains("What sensors are attached to the horses?"));
    assert!(calls[0].1.is_none());
    assert!(calls[1].0.contains(&report.context));
    assert!(calls[1].1.as_deref().unwrap().contains("Never invent"));
}

#[test]
fn json_fence_is_stripped_before_parsing() {
    let fenced = format!(
        "```json\n{}\n```",
        query_reply(SENSOR_QUERY, &["Horse", "Sensor"], &["isAttachedTo"])
    );
    let model = Scripted::new(vec![Ok(fenced), Ok("Two sensors.".into())]);
    let outcome = pipeline(model).answer("What sensors are attached to the horses?");

    let report = outcome.success().expect("success");
    assert_eq!(report.generated_query.origin, QueryOrigin::Parsed);
    assert_eq!(report.generated_query.query_text, SENSOR_QUERY);
    assert_eq!(report.result_count, 2);
}

#[test]
fn prose_reply_is_recovered_by_fallback() {
    let prose = format!("Sure, here is the query:\n\n{SENSOR_QUERY}\n\nThis finds each sensor.");
    let model = Scripted::new(vec![Ok(prose), Ok("Two horses wear sensors.".into())]);
    let outcome = pipeline(model).answer("What sensors are attached to the horses?");

    let report = outcome.success().expect("success");
    assert_eq!(
        report.generated_query.origin,
        QueryOrigin::Fallback {
            pattern: "prefixed-select".into()
        }
    );
    assert_eq!(report.generated_query.query_text, SENSOR_QUERY);
    assert!(report.generated_query.entities_used.is_empty());
    assert_eq!(report.result_count, 2);
}

#[test]
fn prose_mentioning_prefix_still_executes() {
    let prose =
        format!("I used the horses prefix as requested:\n\n{SENSOR_QUERY}\n\nIt lists sensors.");
    let model = Scripted::new(vec![Ok(prose), Ok("Two horses wear sensors.".into())]);
    let outcome = pipeline(model).answer("What sensors are attached to the horses?");

    let report = outcome.success().expect("recovered query executes");
    assert_eq!(report.generated_query.query_text, SENSOR_QUERY);
    assert_eq!(report.result_count, 2);
}

#[test]
fn unparseable_reply_runs_default_query() {
    let model = Scripted::new(vec![
        Ok("I am not able to write SPARQL today.".into()),
        Ok("Here is a sample of the graph.".into()),
        Ok("Still no SPARQL.".into()),
        Ok("Another sample.".into()),
    ]);
    let pipeline = pipeline(model);

    let first = pipeline.answer("Tell me something");
    let second = pipeline.answer("Tell me something else");
    let a = first.success().expect("success");
    let b = second.success().expect("success");

    assert_eq!(a.generated_query.origin, QueryOrigin::Default);
    assert_eq!(a.generated_query.query_text, b.generated_query.query_text);
    assert!(a.generated_query.query_text.contains("LIMIT 10"));
    assert!(a.result_count > 0 && a.result_count <= 10);
}

#[test]
fn generation_failure_degrades_to_default_query() {
    let model = Scripted::new(vec![
        Err(LlmError::Exhausted {
            attempts: 3,
            last: Box::new(LlmError::Timeout { timeout_secs: 60 }),
        }),
        Ok("A sample of the graph.".into()),
    ]);
    let outcome = pipeline(model).answer("Which horse is the fastest?");
    let report = outcome.success().expect("generation failure is soft");
    assert_eq!(report.generated_query.origin, QueryOrigin::Default);
    assert!(report.generated_query.is_degraded());
}

#[test]
fn zero_results_is_success_with_no_information_branch() {
    let model = Scripted::new(vec![
        Ok(query_reply(UNICORN_QUERY, &["Unicorn"], &[])),
        Ok("Sorry, I found no unicorns. They may not be in the graph yet.".into()),
    ]);
    let outcome = pipeline(model.clone()).answer("Which unicorns are there?");

    let report = outcome.success().expect("success");
    assert_eq!(report.result_count, 0);
    assert!(report.result_set.is_empty());
    assert_eq!(report.answer_origin, AnswerOrigin::Synthesized);

    let calls = model.calls();
    assert!(calls[1].0.contains("returned no results"));
}

#[test]
fn zero_results_with_failed_synthesis_uses_fixed_message() {
    let model = Scripted::new(vec![
        Ok(query_reply(UNICORN_QUERY, &["Unicorn"], &[])),
        Err(LlmError::Unavailable {
            url: "http://localhost:1234/v1".into(),
        }),
    ]);
    let outcome = pipeline(model).answer("Which unicorns are there?");

    let report = outcome.success().expect("success");
    assert_eq!(report.result_count, 0);
    assert_eq!(report.answer_origin, AnswerOrigin::Fallback);
    assert!(report.answer.contains("could not find any information"));
    assert!(!report.answer.contains("localhost"));
}

#[test]
fn failed_synthesis_with_results_reports_count_and_excerpt() {
    let model = Scripted::new(vec![
        Ok(query_reply(SENSOR_QUERY, &["Horse", "Sensor"], &["isAttachedTo"])),
        Err(LlmError::Timeout { timeout_secs: 60 }),
    ]);
    let outcome = pipeline(model).answer("What sensors are attached to the horses?");

    let report = outcome.success().expect("synthesis failure is soft");
    assert_eq!(report.answer_origin, AnswerOrigin::Fallback);
    assert!(report.answer.starts_with("I found 2 result(s)"));
    assert!(report.answer.contains("Results found: 2"));
    assert!(!report.answer.contains("timed out"));
}

#[test]
fn context_failure_falls_back_to_raw_dump() {
    let model = Scripted::new(vec![
        Ok(query_reply(SENSOR_QUERY, &["Horse", "Sensor"], &["isAttachedTo"])),
        Ok("Two sensors.".into()),
    ]);
    let pipeline = build(model, Box::new(store()), Box::new(FailingFormatter));
    let outcome = pipeline.answer("What sensors are attached to the horses?");

    let report = outcome.success().expect("context failure is soft");
    assert_eq!(report.context_origin, ContextOrigin::RawDump);
    assert_eq!(report.context, report.result_set.raw_dump());
    assert!(report.context.contains(&format!("{NS}Sensor123")));
    assert_eq!(report.answer, "Two sensors.");
}

#[test]
fn connectivity_failure_carries_generated_query() {
    let model = Scripted::new(vec![Ok(query_reply(
        SENSOR_QUERY,
        &["Horse", "Sensor"],
        &["isAttachedTo"],
    ))]);
    let pipeline = build(
        model.clone(),
        Box::new(FailingExecutor(|| StoreError::Connection {
            endpoint: "http://localhost:7200/repositories/horse-knowledge-graph".into(),
            message: "connection refused".into(),
        })),
        Box::new(ProseContextFormatter::default()),
    );
    let outcome = pipeline.answer("What sensors are attached to the horses?");

    let failure = outcome.failure().expect("failure");
    assert_eq!(failure.stage, Stage::Execution);
    assert_eq!(failure.kind, ExecutionFailureKind::Connectivity);
    assert_eq!(
        failure.partial.generated_query.as_ref().unwrap().query_text,
        SENSOR_QUERY
    );
    assert!(failure.message.contains("unreachable"));
    assert!(failure.detail.contains("connection refused"));
    assert_eq!(outcome.final_state(), PipelineState::Failed(Stage::Execution));
    assert_eq!(
        failure.states.last(),
        Some(&PipelineState::Failed(Stage::Execution))
    );
    // No synthesis call after a hard failure.
    assert_eq!(model.calls().len(), 1);
}

#[test]
fn unreachable_endpoint_is_execution_failure() {
    let model = Scripted::new(vec![Ok(query_reply(SENSOR_QUERY, &["Horse"], &[]))]);
    let pipeline = build(
        model,
        Box::new(SparqlEndpoint::new("http://127.0.0.1:1/repositories/none", 2)),
        Box::new(ProseContextFormatter::default()),
    );
    let outcome = pipeline.answer("What sensors are attached to the horses?");

    assert!(!outcome.is_success());
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, ExecutionFailureKind::Connectivity);
    assert!(outcome.generated_query().is_some());
}

#[test]
fn timeout_is_classified() {
    let model = Scripted::new(vec![Ok(query_reply(SENSOR_QUERY, &[], &[]))]);
    let pipeline = build(
        model,
        Box::new(FailingExecutor(|| StoreError::Timeout {
            endpoint: "http://localhost:7200".into(),
            timeout_secs: 60,
        })),
        Box::new(ProseContextFormatter::default()),
    );
    let failure = pipeline.answer("q").failure().cloned().unwrap();
    assert_eq!(failure.kind, ExecutionFailureKind::Timeout);
}

#[test]
fn malformed_query_is_classified() {
    let model = Scripted::new(vec![Ok(query_reply(
        "SELECT ?s WHERE { ?s horses:undeclared ?o }",
        &[],
        &[],
    ))]);
    let outcome = pipeline(model).answer("q");
    let failure = outcome.failure().expect("undeclared prefix is rejected");
    assert_eq!(failure.kind, ExecutionFailureKind::MalformedQuery);
    assert!(failure.message.contains("rephrasing"));
}

#[test]
fn outcome_json_has_diagnostic_fields() {
    let model = Scripted::new(vec![
        Ok(query_reply(SENSOR_QUERY, &["Horse", "Sensor"], &["isAttachedTo"])),
        Ok("Two sensors.".into()),
    ]);
    let outcome = pipeline(model).answer("What sensors are attached to the horses?");
    let json = serde_json::to_value(&outcome).unwrap();

    assert_eq!(json["outcome"], "success");
    assert_eq!(json["result_count"], 2);
    assert_eq!(json["generated_query"]["origin"]["kind"], "parsed");
    assert_eq!(json["result_set"]["bindings"].as_array().unwrap().len(), 2);
    assert_eq!(
        json["result_set"]["bindings"][0]["horse"]["type"],
        "reference"
    );
    assert_eq!(json["answer_origin"], "synthesized");
}

#[test]
fn concurrent_questions_are_independent() {
    let model = Arc::new(RoleAware {
        query_reply: query_reply(SENSOR_QUERY, &["Horse", "Sensor"], &["isAttachedTo"]),
        answer: "Two sensors.".into(),
    });
    let pipeline = pipeline(model);

    let outcomes: Vec<PipelineOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pipeline = &pipeline;
                scope.spawn(move || pipeline.answer(&format!("Question {i}: which sensors?")))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(outcomes.len(), 8);
    for (i, outcome) in outcomes.iter().enumerate() {
        let report = outcome.success().expect("success");
        assert_eq!(report.question, format!("Question {i}: which sensors?"));
        assert_eq!(report.result_count, 2);
    }
}
