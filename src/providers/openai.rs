//! OpenAI provider implementation using the `/v1/chat/completions` API.
//!
//! Structured output is requested through `response_format` with a JSON
//! schema; the model's message content is then the JSON payload itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_http_response, duration_to_ms, LlmProvider, LlmRequest, LlmResponse, ParsedCompletion,
    ProviderError,
};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// OpenAI chat completions API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages (system + user).
    pub messages: Vec<OpenAiMessage>,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Structured-output constraint, when a schema was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// A message in OpenAI chat format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiMessage {
    /// Role (`system` or `user`).
    pub role: String,
    /// Plain text content.
    pub content: String,
}

/// OpenAI chat completions API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    /// Response choices.
    pub choices: Vec<OpenAiChoice>,
    /// Model that served the response.
    pub model: String,
    /// Token usage.
    pub usage: Option<OpenAiUsage>,
}

/// A response choice from OpenAI.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    /// Assistant message for this choice.
    pub message: OpenAiResponseMessage,
}

/// Assistant message from OpenAI.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponseMessage {
    /// Text content.
    pub content: Option<String>,
}

/// OpenAI usage statistics.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiUsage {
    /// Prompt token count.
    pub prompt_tokens: Option<u64>,
    /// Completion token count.
    pub completion_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build an OpenAI API request from an [`LlmRequest`].
#[doc(hidden)]
pub fn build_request(model: &str, request: &LlmRequest) -> OpenAiRequest {
    let response_format = request.output_schema.as_ref().map(|schema| {
        serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "schema": schema.schema,
            }
        })
    });

    OpenAiRequest {
        model: model.to_owned(),
        messages: vec![
            OpenAiMessage {
                role: "system".to_owned(),
                content: request.system_prompt.clone(),
            },
            OpenAiMessage {
                role: "user".to_owned(),
                content: request.user_message.clone(),
            },
        ],
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature.unwrap_or(0.0),
        response_format,
    }
}

/// Parse an OpenAI API response body.
///
/// # Errors
///
/// Returns `ProviderError::Parse` when the body cannot be deserialized or
/// `choices[0]` has no content.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<ParsedCompletion, ProviderError> {
    let resp: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ProviderError::Parse("missing choices[0] content".to_owned()))?;

    Ok(ParsedCompletion {
        content,
        model: resp.model,
        input_tokens: resp
            .usage
            .as_ref()
            .and_then(|u| u.prompt_tokens)
            .unwrap_or(0),
        output_tokens: resp
            .usage
            .as_ref()
            .and_then(|u| u.completion_tokens)
            .unwrap_or(0),
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// OpenAI chat completions API provider.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider instance.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let api_request = build_request(&self.model, request);

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(OPENAI_API_BASE)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&api_request)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        let latency_ms = duration_to_ms(started.elapsed());

        let parsed = parse_response(&payload)?;
        Ok(LlmResponse {
            content: parsed.content,
            provider: self.name().to_owned(),
            model: parsed.model,
            input_tokens: parsed.input_tokens,
            output_tokens: parsed.output_tokens,
            latency_ms,
        })
    }
}
