//! Answer synthesis: the second model call, which phrases the query results as
//! a natural-language answer.
//!
//! The synthesizer itself reports failures; the pipeline replaces a failed
//! synthesis with [`fallback_answer`], so a successful query always yields some
//! answer.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::config::Language;
use crate::llm::{Completion, LlmError};

/// Errors from answer synthesis.
#[derive(Debug, Error, Diagnostic)]
pub enum SynthesisError {
    #[error("answer completion failed: {0}")]
    #[diagnostic(code(kga::synth::completion))]
    Completion(#[from] LlmError),

    #[error("answer completion was empty")]
    #[diagnostic(code(kga::synth::empty))]
    Empty,
}

const SYSTEM_EN: &str = "You are an assistant that answers questions about a knowledge graph. \
    Answer ONLY from the information in the supplied context. \
    If the context does not contain the information, say so clearly. \
    Never invent facts, names or numbers that are not in the context. \
    Answer in English, in clear and concise sentences.";

const SYSTEM_FR: &str = "Tu es un assistant qui répond à des questions sur un graphe de connaissances. \
    Réponds UNIQUEMENT à partir des informations du contexte fourni. \
    Si le contexte ne contient pas l'information, dis-le clairement. \
    N'invente jamais de faits, de noms ou de chiffres absents du contexte. \
    Réponds en français, en phrases claires et concises.";

/// Phrases answers from query context with a language model.
pub struct AnswerSynthesizer {
    completion: Arc<dyn Completion>,
    language: Language,
}

impl AnswerSynthesizer {
    pub fn new(completion: Arc<dyn Completion>, language: Language) -> Self {
        Self {
            completion,
            language,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self.language {
            Language::English => SYSTEM_EN,
            Language::French => SYSTEM_FR,
        }
    }

    /// The user section of the synthesis prompt.
    pub fn prompt(&self, question: &str, context: &str, result_count: usize) -> String {
        match (self.language, result_count) {
            (Language::English, 0) => format!(
                "Question: {question}\n\n\
                 The knowledge graph query returned no results.\n\
                 Politely apologise that you could not find this information and \
                 suggest that the data may not have been added to the knowledge graph yet."
            ),
            (Language::English, _) => format!(
                "Question: {question}\n\n\
                 Context from the knowledge graph ({result_count} result(s)):\n\
                 {context}\n\n\
                 Answer the question precisely, using only the context above."
            ),
            (Language::French, 0) => format!(
                "Question : {question}\n\n\
                 La requête sur le graphe de connaissances n'a retourné aucun résultat.\n\
                 Excuse-toi poliment de ne pas avoir trouvé cette information et \
                 suggère que les données n'ont peut-être pas encore été ajoutées au graphe."
            ),
            (Language::French, _) => format!(
                "Question : {question}\n\n\
                 Contexte issu du graphe de connaissances ({result_count} résultat(s)) :\n\
                 {context}\n\n\
                 Réponds précisément à la question en utilisant uniquement le contexte ci-dessus."
            ),
        }
    }

    /// Ask the model for an answer. The reply is returned verbatim.
    pub fn synthesize(
        &self,
        question: &str,
        context: &str,
        result_count: usize,
    ) -> Result<String, SynthesisError> {
        let prompt = self.prompt(question, context, result_count);
        let answer = self.completion.complete(&prompt, Some(self.system_prompt()))?;
        if answer.trim().is_empty() {
            return Err(SynthesisError::Empty);
        }
        Ok(answer)
    }
}

impl std::fmt::Debug for AnswerSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerSynthesizer")
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

/// Fixed-format answer used when synthesis fails.
///
/// With results, reports the count and the first `excerpt_chars` characters
/// of the context; without, a fixed "no information" message.
pub fn fallback_answer(
    result_count: usize,
    context: &str,
    excerpt_chars: usize,
    language: Language,
) -> String {
    if result_count == 0 {
        return match language {
            Language::English => "Sorry, I could not find any information in the knowledge \
                graph to answer this question. The data may not have been added yet."
                .to_string(),
            Language::French => "Désolé, je n'ai trouvé aucune information dans le graphe \
                de connaissances pour répondre à cette question. Les données n'ont peut-être \
                pas encore été ajoutées."
                .to_string(),
        };
    }

    let context = context.trim();
    let excerpt = match context.char_indices().nth(excerpt_chars) {
        Some((cut, _)) => format!("{}...", &context[..cut]),
        None => context.to_string(),
    };
    match language {
        Language::English => {
            format!("I found {result_count} result(s) in the knowledge graph. Raw data: {excerpt}")
        }
        Language::French => {
            format!("J'ai trouvé {result_count} résultat(s) dans le graphe de connaissances. Données brutes : {excerpt}")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records the last call and replies with a fixed result.
    struct Fixed {
        reply: Result<&'static str, ()>,
        seen: Mutex<Option<(String, Option<String>)>>,
    }

    impl Fixed {
        fn new(reply: Result<&'static str, ()>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(None),
            })
        }
    }

    impl Completion for Fixed {
        fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
            *self.seen.lock().unwrap() = Some((prompt.to_string(), system.map(str::to_string)));
            self.reply
                .map(str::to_string)
                .map_err(|()| LlmError::Unavailable {
                    url: "http://localhost:1234/v1".into(),
                })
        }
    }

    #[test]
    fn answer_is_returned_verbatim_with_system_prompt() {
        let model = Fixed::new(Ok("  Dakota trains four times a week.\n"));
        let synth = AnswerSynthesizer::new(model.clone(), Language::English);
        let answer = synth
            .synthesize("How often does Dakota train?", "Result 1:\n  frequency: 4", 1)
            .unwrap();
        assert_eq!(answer, "  Dakota trains four times a week.\n");

        let (prompt, system) = model.seen.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Result 1:\n  frequency: 4"));
        assert!(prompt.contains("using only the context above"));
        assert!(system.unwrap().contains("Never invent"));
    }

    #[test]
    fn zero_results_prompt_asks_for_apology() {
        let synth = AnswerSynthesizer::new(Fixed::new(Ok("x")), Language::English);
        let prompt = synth.prompt("Which unicorns exist?", "Results found: 0", 0);
        assert!(prompt.contains("no results"));
        assert!(prompt.contains("apologise"));
        assert!(!prompt.contains("Results found"));
    }

    #[test]
    fn french_prompts() {
        let synth = AnswerSynthesizer::new(Fixed::new(Ok("x")), Language::French);
        assert!(synth.system_prompt().contains("UNIQUEMENT"));
        assert!(synth.prompt("Quels chevaux ?", "ctx", 2).contains("2 résultat(s)"));
    }

    #[test]
    fn completion_failure_is_reported() {
        let synth = AnswerSynthesizer::new(Fixed::new(Err(())), Language::English);
        assert!(matches!(
            synth.synthesize("q", "ctx", 1),
            Err(SynthesisError::Completion(LlmError::Unavailable { .. }))
        ));
    }

    #[test]
    fn blank_answer_is_an_error() {
        let synth = AnswerSynthesizer::new(Fixed::new(Ok(" \n ")), Language::English);
        assert!(matches!(
            synth.synthesize("q", "ctx", 1),
            Err(SynthesisError::Empty)
        ));
    }

    #[test]
    fn fallback_with_results_quotes_excerpt() {
        let context = "a".repeat(300);
        let answer = fallback_answer(3, &context, 200, Language::English);
        assert!(answer.starts_with("I found 3 result(s)"));
        assert!(answer.ends_with(&format!("{}...", "a".repeat(200))));
    }

    #[test]
    fn fallback_excerpt_respects_char_boundaries() {
        let context = "é".repeat(10);
        let answer = fallback_answer(1, &context, 4, Language::French);
        assert!(answer.ends_with("éééé..."));
    }

    #[test]
    fn fallback_short_context_is_not_truncated() {
        let answer = fallback_answer(1, "  horse: Horse1 \n", 200, Language::English);
        assert!(answer.ends_with("Raw data: horse: Horse1"));
    }

    #[test]
    fn fallback_without_results_is_fixed() {
        let a = fallback_answer(0, "ignored", 200, Language::English);
        assert_eq!(a, fallback_answer(0, "", 10, Language::English));
        assert!(a.contains("could not find any information"));
    }
}
