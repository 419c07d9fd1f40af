// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kg-answer
//!
//! Natural-language question answering over a fixed-schema knowledge graph.
//! A language model translates each question into SPARQL, the query runs
//! against a triple store, and the model phrases an answer from the results.
//!
//! ## Architecture
//!
//! - **Ontology** (`ontology`): schema summary and few-shot exemplars for the prompt
//! - **Generator** (`generator`): question → SPARQL with JSON, pattern and default fallbacks
//! - **Store** (`store`): remote SPARQL endpoint or embedded oxigraph store
//! - **Context** (`context`): result set → prose context
//! - **Synthesis** (`synth`): context → answer, with a fixed fallback
//! - **Pipeline** (`pipeline`): the state machine tying the stages together
//!
//! ## Library usage
//!
//! ```no_run
//! use kg_answer::config::KgaConfig;
//! use kg_answer::pipeline::{Pipeline, PipelineOutcome};
//!
//! let pipeline = Pipeline::from_config(&KgaConfig::default()).unwrap();
//! match pipeline.answer("Which sensors are attached to the horses?") {
//!     PipelineOutcome::Success(report) => println!("{}", report.answer),
//!     PipelineOutcome::Failure(failure) => eprintln!("{}", failure.message),
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod generator;
pub mod llm;
pub mod ontology;
pub mod pipeline;
pub mod store;
pub mod synth;
