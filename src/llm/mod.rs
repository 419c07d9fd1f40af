//! Completion client for a local inference server.
//!
//! The model is used twice per question: once to translate the question into
//! SPARQL and once to phrase the answer. Both calls go through the
//! [`Completion`] trait so the pipeline can be driven by a scripted model in
//! tests. [`CompletionClient`] is the HTTP implementation; it owns the retry
//! policy, so callers issue exactly one `complete` call per prompt.

use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;
use crate::error::ConfigError;

/// Errors from the completion subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("completion server is not reachable at {url}")]
    #[diagnostic(
        code(kga::llm::unavailable),
        help("Start the inference server (LM Studio or `ollama serve`) or fix `llm.endpoint`.")
    )]
    Unavailable { url: String },

    #[error("completion request failed: {message}")]
    #[diagnostic(
        code(kga::llm::request_failed),
        help("Check that the server is running and the model is loaded.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse completion response: {message}")]
    #[diagnostic(
        code(kga::llm::parse_error),
        help("The server returned an unexpected response format. Check `llm.provider`.")
    )]
    ParseError { message: String },

    #[error("completion request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(kga::llm::timeout),
        help("Increase `llm.timeout_secs` or use a smaller model.")
    )]
    Timeout { timeout_secs: u64 },

    #[error("completion failed after {attempts} attempt(s): {last}")]
    #[diagnostic(
        code(kga::llm::exhausted),
        help("All retry attempts failed. See the last error for the cause.")
    )]
    Exhausted { attempts: u32, last: Box<LlmError> },
}

/// A text completion service.
pub trait Completion: Send + Sync {
    /// Complete `prompt`, optionally under a system prompt.
    fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError>;
}

/// Wire protocol spoken by the inference server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LlmProvider {
    /// `POST {endpoint}/chat/completions` (LM Studio, llama.cpp server, vLLM).
    #[default]
    OpenAiCompatible,
    /// `POST {endpoint}/api/generate`.
    Ollama,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai-compatible" | "openai" | "lmstudio" | "lm-studio" => Ok(Self::OpenAiCompatible),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Invalid {
                message: format!("unknown llm provider \"{other}\""),
            }),
        }
    }
}

/// Bounded retry with a geometric backoff schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub backoff_ms: u64,
    /// Factor applied to the delay after each further failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2000,
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Longest wait between two attempts.
    pub const MAX_DELAY_MS: u64 = 60_000;
    /// Largest accepted `multiplier`.
    pub const MAX_MULTIPLIER: f64 = 10.0;

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = if self.multiplier.is_nan() {
            0.0
        } else {
            self.multiplier.clamp(0.0, Self::MAX_MULTIPLIER)
        };
        let millis = self.backoff_ms as f64 * factor.powi(exponent);
        if millis.is_nan() {
            return Duration::ZERO;
        }
        Duration::from_millis(millis.min(Self::MAX_DELAY_MS as f64).round() as u64)
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Result<T, LlmError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => {
                    return Err(if attempts == 1 {
                        e
                    } else {
                        LlmError::Exhausted {
                            attempts,
                            last: Box::new(e),
                        }
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(error = %e, attempt, ?delay, "completion attempt failed, retrying");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// HTTP completion client.
pub struct CompletionClient {
    config: LlmConfig,
}

impl CompletionClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    /// Get the model name being used.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Check that the server answers its model-listing endpoint.
    pub fn probe(&self) -> bool {
        let url = match self.config.provider {
            LlmProvider::OpenAiCompatible => self.url("models"),
            LlmProvider::Ollama => self.url("api/tags"),
        };
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();

        match agent.get(&url).call() {
            Ok(resp) => resp.status() == 200,
            Err(e) => {
                tracing::debug!(error = %e, url, "completion probe failed");
                false
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.endpoint.trim_end_matches('/'))
    }

    /// One HTTP round trip, no retries.
    fn complete_once(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        let url = match self.config.provider {
            LlmProvider::OpenAiCompatible => self.url("chat/completions"),
            LlmProvider::Ollama => self.url("api/generate"),
        };
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build();

        let body = request_body(&self.config, prompt, system);
        let body_str = serde_json::to_string(&body).map_err(|e| LlmError::RequestFailed {
            message: format!("JSON serialize error: {e}"),
        })?;

        let resp = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body_str)
            .map_err(|e| map_http_error(e, &url, self.config.timeout_secs))?;

        let resp_str = resp.into_string().map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;

        let json: serde_json::Value =
            serde_json::from_str(&resp_str).map_err(|e| LlmError::ParseError {
                message: e.to_string(),
            })?;

        response_text(self.config.provider, &json)
    }
}

impl Completion for CompletionClient {
    fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError> {
        self.config
            .retry
            .run(|_attempt| self.complete_once(prompt, system))
    }
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("provider", &self.config.provider)
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .finish()
    }
}

/// Build the JSON request body for the configured provider.
fn request_body(config: &LlmConfig, prompt: &str, system: Option<&str>) -> serde_json::Value {
    match config.provider {
        LlmProvider::OpenAiCompatible => {
            let mut messages = Vec::with_capacity(2);
            if let Some(sys) = system {
                messages.push(serde_json::json!({"role": "system", "content": sys}));
            }
            messages.push(serde_json::json!({"role": "user", "content": prompt}));
            serde_json::json!({
                "model": config.model,
                "messages": messages,
                "temperature": config.temperature,
                "max_tokens": config.max_tokens,
                "stream": false,
            })
        }
        LlmProvider::Ollama => {
            let mut body = serde_json::json!({
                "model": config.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": config.temperature,
                    "num_predict": config.max_tokens,
                },
            });
            if let Some(sys) = system {
                body["system"] = serde_json::Value::String(sys.to_string());
            }
            body
        }
    }
}

/// Pull the generated text out of a provider response.
fn response_text(provider: LlmProvider, json: &serde_json::Value) -> Result<String, LlmError> {
    let text = match provider {
        LlmProvider::OpenAiCompatible => json["choices"][0]["message"]["content"].as_str(),
        LlmProvider::Ollama => json["response"].as_str(),
    };
    text.map(|s| s.to_string()).ok_or_else(|| LlmError::ParseError {
        message: match provider {
            LlmProvider::OpenAiCompatible => "missing 'choices[0].message.content' field".into(),
            LlmProvider::Ollama => "missing 'response' field".into(),
        },
    })
}

/// Whether a ureq transport error was caused by an I/O timeout.
pub(crate) fn transport_timed_out(transport: &ureq::Transport) -> bool {
    std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
}

fn map_http_error(err: ureq::Error, url: &str, timeout_secs: u64) -> LlmError {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            LlmError::RequestFailed {
                message: format!("server returned status {code}: {}", body.trim()),
            }
        }
        ureq::Error::Transport(transport) => {
            if transport_timed_out(&transport) {
                LlmError::Timeout { timeout_secs }
            } else if matches!(
                transport.kind(),
                ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns
            ) {
                LlmError::Unavailable {
                    url: url.to_string(),
                }
            } else {
                LlmError::RequestFailed {
                    message: transport.to_string(),
                }
            }
        }
    }
}
