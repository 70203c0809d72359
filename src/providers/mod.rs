//! LLM provider abstraction layer.
//!
//! Defines the [`LlmProvider`] trait and the shared request/response types
//! used by all provider implementations.
//!
//! Two providers are implemented:
//! - [`anthropic::ClaudeProvider`] -- Anthropic `/v1/messages` API
//! - [`openai::OpenAiProvider`] -- OpenAI `/v1/chat/completions` API
//!
//! Adapters translate one [`LlmRequest`] into one HTTP call, measure
//! wall-clock latency around it, and map vendor usage fields onto
//! [`LlmResponse`]. Retries are the [`LlmService`](crate::llm::LlmService)'s
//! job -- adapters never retry internally.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod openai;

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// JSON Schema the model is asked to conform to, for provider-native
/// structured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Schema name (e.g. "evaluate_escalation").
    pub name: String,
    /// JSON Schema object describing the expected output.
    pub schema: serde_json::Value,
}

/// A request to an LLM provider for a single completion.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// System prompt (role instructions).
    pub system_prompt: String,
    /// User message (the content to analyze).
    pub user_message: String,
    /// Maximum tokens in the response.
    pub max_tokens: Option<u32>,
    /// Sampling temperature. Absent means 0.0 on the wire.
    pub temperature: Option<f32>,
    /// When set, the adapter requests provider-native structured output.
    /// When absent, the caller relies on tolerant parsing instead.
    pub output_schema: Option<OutputSchema>,
}

impl LlmRequest {
    /// Build a plain-text request with defaults (temperature 0, no schema).
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            max_tokens: None,
            temperature: None,
            output_schema: None,
        }
    }

    /// Set the max-token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Request provider-native structured output against a schema.
    #[must_use]
    pub fn with_output_schema(
        mut self,
        name: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        self.output_schema = Some(OutputSchema {
            name: name.into(),
            schema,
        });
        self
    }
}

/// Provider-agnostic view of a parsed completion, before latency and
/// provider name are attached. Shared by the adapters' `parse_response`
/// functions.
#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCompletion {
    /// Response text or serialized tool input.
    pub content: String,
    /// Model that served the response.
    pub model: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens generated.
    pub output_tokens: u64,
}

/// The response from an LLM provider, normalized across vendors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    /// Response text. For structured-output calls this is the JSON payload.
    pub content: String,
    /// Provider name that served the call.
    pub provider: String,
    /// Model identifier that served the call.
    pub model: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens generated.
    pub output_tokens: u64,
    /// Wall-clock latency around the remote call, in milliseconds.
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Response did not match the expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// HTTP helpers (shared by all providers)
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-proj-[A-Za-z0-9_\-]{20,}",
        r"sk-[A-Za-z0-9]{32,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

/// Convert an elapsed [`std::time::Duration`] to whole milliseconds.
pub(crate) fn duration_to_ms(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core LLM provider interface.
///
/// Implementations must be `Send + Sync` and stateless so a single instance
/// can be shared across experts and concurrent pipeline invocations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider name ("claude", "openai").
    fn name(&self) -> &str;

    /// The model identifier this provider is instantiated for.
    fn model_id(&self) -> &str;

    /// Request a completion from the LLM.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;
}
