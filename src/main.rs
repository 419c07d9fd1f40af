//! kg-answer CLI: ask questions of a knowledge graph in natural language.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rayon::prelude::*;

use kg_answer::config::{KgaConfig, Language};
use kg_answer::llm::CompletionClient;
use kg_answer::pipeline::{AnswerOrigin, AnswerReport, Pipeline, PipelineOutcome};
use kg_answer::store::{EmbeddedStore, SparqlEndpoint};

#[derive(Parser)]
#[command(
    name = "kg-answer",
    version,
    about = "Answer natural-language questions over a knowledge graph"
)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local RDF file to query instead of the remote endpoint.
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// SPARQL endpoint URL.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Model name on the completion server.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Answer language: "en" or "fr".
    #[arg(long, global = true)]
    language: Option<Language>,

    /// Log pipeline progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question.
    Ask {
        /// The question, in natural language.
        question: String,

        /// Print only the answer.
        #[arg(long)]
        quiet: bool,

        /// Print the whole outcome as JSON.
        #[arg(long, conflicts_with = "quiet")]
        json: bool,
    },

    /// Interactive question loop.
    Chat,

    /// Answer every question of a file (one per line) concurrently.
    Batch {
        /// File with one question per line; blank lines and `#` comments are skipped.
        #[arg(long)]
        file: PathBuf,

        /// Print the outcomes as a JSON array.
        #[arg(long)]
        json: bool,
    },

    /// Check that the triple store and the completion server are reachable.
    Check,

    /// Print the effective configuration.
    Config {
        /// Write it to this path instead.
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Ask {
            question,
            quiet,
            json,
        } => {
            let pipeline = Pipeline::from_config(&config)?;
            let outcome = pipeline.answer(&question);
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome).into_diagnostic()?
                );
            } else {
                match &outcome {
                    PipelineOutcome::Success(report) if quiet => println!("{}", report.answer.trim()),
                    PipelineOutcome::Success(report) => print_trace(report),
                    PipelineOutcome::Failure(failure) => {
                        eprintln!("Error during {}: {}", failure.stage, failure.message);
                        if let Some(query) = &failure.partial.generated_query {
                            eprintln!("\nAttempted query:\n{}", query.query_text);
                        }
                    }
                }
            }
            if !outcome.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Chat => {
            let pipeline = Pipeline::from_config(&config)?;
            run_chat(&pipeline)?;
        }

        Commands::Batch { file, json } => {
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            let questions: Vec<&str> = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .collect();

            let pipeline = Pipeline::from_config(&config)?;
            let outcomes: Vec<PipelineOutcome> =
                questions.par_iter().map(|q| pipeline.answer(q)).collect();

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcomes).into_diagnostic()?
                );
            } else {
                for outcome in &outcomes {
                    println!("{}", summary_line(outcome));
                }
                let failed = outcomes.iter().filter(|o| !o.is_success()).count();
                println!(
                    "\n{} question(s), {} answered, {failed} failed",
                    outcomes.len(),
                    outcomes.len() - failed
                );
            }
        }

        Commands::Check => {
            let mut healthy = true;

            match &config.store.data_file {
                Some(path) => match EmbeddedStore::from_file(path).and_then(|s| s.len()) {
                    Ok(n) => println!("store:      ok ({n} triples in {})", path.display()),
                    Err(e) => {
                        healthy = false;
                        println!("store:      FAILED ({e})");
                    }
                },
                None => {
                    let endpoint =
                        SparqlEndpoint::new(config.store.endpoint.clone(), config.store.timeout_secs);
                    match endpoint.triple_count() {
                        Ok(n) => println!("store:      ok ({n} triples at {})", endpoint.url()),
                        Err(e) => {
                            healthy = false;
                            println!("store:      FAILED ({e})");
                        }
                    }
                }
            }

            let client = CompletionClient::new(config.llm.clone());
            if client.probe() {
                println!("completion: ok ({} at {})", client.model(), config.llm.endpoint);
            } else {
                healthy = false;
                println!("completion: FAILED (no answer from {})", config.llm.endpoint);
            }

            if !healthy {
                std::process::exit(1);
            }
        }

        Commands::Config { write } => match write {
            Some(path) => {
                config.save(&path)?;
                println!("Configuration written to {}", path.display());
            }
            None => print!("{}", config.to_toml()?),
        },
    }

    Ok(())
}

/// Defaults, then the config file, then `KGA_*` variables, then flags.
fn resolve_config(cli: &Cli) -> Result<KgaConfig> {
    let mut config = match &cli.config {
        Some(path) => KgaConfig::load(path)?,
        None => KgaConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;

    if let Some(data) = &cli.data {
        config.store.data_file = Some(data.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config.store.endpoint = endpoint.clone();
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(language) = cli.language {
        config.answer.language = language;
    }
    Ok(config)
}

fn print_trace(report: &AnswerReport) {
    const PREVIEW_CHARS: usize = 500;
    let query = &report.generated_query;
    let join = |set: &std::collections::BTreeSet<String>| {
        if set.is_empty() {
            "-".to_string()
        } else {
            set.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    };

    println!("Question: {}\n", report.question);
    println!("[1] Generated query:\n{}\n", query.query_text);
    println!("    Entities:    {}", join(&query.entities_used));
    println!("    Relations:   {}", join(&query.relations_used));
    println!("    Explanation: {}\n", query.explanation);
    println!("[2] Results: {}\n", report.result_count);

    let preview = match report.context.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &report.context[..cut]),
        None => report.context.clone(),
    };
    println!("[3] Context:\n{}\n", preview.trim_end());

    let marker = match report.answer_origin {
        AnswerOrigin::Synthesized => "",
        AnswerOrigin::Fallback => " (fallback)",
    };
    println!("[4] Answer{marker}:\n{}", report.answer.trim());
}

fn summary_line(outcome: &PipelineOutcome) -> String {
    match outcome {
        PipelineOutcome::Success(report) => {
            let first_line = report.answer.trim().lines().next().unwrap_or_default();
            format!(
                "[ok, {} result(s)] {} -> {first_line}",
                report.result_count, report.question
            )
        }
        PipelineOutcome::Failure(failure) => format!(
            "[failed: {}] {} -> {}",
            failure.kind, failure.question, failure.message
        ),
    }
}

fn run_chat(pipeline: &Pipeline) -> Result<()> {
    println!("Ask a question about the knowledge graph. Type \"help\" for examples, \"quit\" to leave.");
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("\n> ");
        stdout.flush().into_diagnostic()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).into_diagnostic()? == 0 {
            break; // EOF
        }
        let input = line.trim();

        match input.to_ascii_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "help" => {
                println!("Example questions:");
                for exemplar in pipeline.generator().ontology().exemplars() {
                    println!("  - {}", exemplar.question);
                }
                continue;
            }
            _ => {}
        }

        match pipeline.answer(input) {
            PipelineOutcome::Success(report) => {
                println!("\n{}", report.answer.trim());
                println!("({} result(s))", report.result_count);
            }
            PipelineOutcome::Failure(failure) => {
                println!("\nSorry, I could not answer: {}.", failure.message);
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}
