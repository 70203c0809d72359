//! Anthropic provider implementation using the `/v1/messages` API.
//!
//! Structured output is requested through native tool calling: the output
//! schema becomes a single forced tool, and the tool call's input is
//! returned as the response content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_http_response, duration_to_ms, LlmProvider, LlmRequest, LlmResponse, ParsedCompletion,
    ProviderError,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Anthropic messages API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// Model identifier.
    pub model: String,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// System prompt.
    pub system: String,
    /// Conversation messages (a single user turn).
    pub messages: Vec<AnthropicMessage>,
    /// Structured-output tool, when a schema was requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AnthropicTool>,
    /// Forces the model to call the structured-output tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// A single message in an Anthropic Messages request.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    /// Role (`user` or `assistant`).
    pub role: String,
    /// Plain text content.
    pub content: String,
}

/// Tool definition carrying the output schema.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicTool {
    /// Tool name (the schema name).
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema for the tool input.
    pub input_schema: Value,
}

/// Anthropic messages API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    /// Content blocks (text and/or tool_use).
    pub content: Vec<Value>,
    /// Model that served the response.
    pub model: String,
    /// Token usage.
    pub usage: Option<AnthropicUsage>,
}

/// Anthropic usage statistics.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicUsage {
    /// Prompt token count.
    pub input_tokens: Option<u64>,
    /// Completion token count.
    pub output_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build an Anthropic API request from an [`LlmRequest`].
#[doc(hidden)]
pub fn build_request(model: &str, request: &LlmRequest) -> AnthropicRequest {
    let (tools, tool_choice) = match &request.output_schema {
        Some(schema) => (
            vec![AnthropicTool {
                name: schema.name.clone(),
                description: format!("Record the {} result.", schema.name),
                input_schema: schema.schema.clone(),
            }],
            Some(serde_json::json!({"type": "tool", "name": schema.name})),
        ),
        None => (Vec::new(), None),
    };

    AnthropicRequest {
        model: model.to_owned(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature.unwrap_or(0.0),
        system: request.system_prompt.clone(),
        messages: vec![AnthropicMessage {
            role: "user".to_owned(),
            content: request.user_message.clone(),
        }],
        tools,
        tool_choice,
    }
}

/// Parse an Anthropic API response body.
///
/// A `tool_use` block wins over text blocks: its input is the structured
/// payload the caller asked for. Otherwise all text blocks are concatenated.
///
/// # Errors
///
/// Returns `ProviderError::Parse` when the body cannot be deserialized or
/// contains no usable content block.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<ParsedCompletion, ProviderError> {
    let resp: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let mut text = String::new();
    let mut tool_input: Option<String> = None;
    for block in &resp.content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default());
            }
            Some("tool_use") => {
                if tool_input.is_none() {
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    let serialized = serde_json::to_string(&input)
                        .map_err(|e| ProviderError::Parse(e.to_string()))?;
                    tool_input = Some(serialized);
                }
            }
            _ => {}
        }
    }

    let content = match tool_input {
        Some(input) => input,
        None if !text.is_empty() => text,
        None => return Err(ProviderError::Parse("empty content array".to_owned())),
    };

    Ok(ParsedCompletion {
        content,
        model: resp.model,
        input_tokens: resp.usage.as_ref().and_then(|u| u.input_tokens).unwrap_or(0),
        output_tokens: resp
            .usage
            .as_ref()
            .and_then(|u| u.output_tokens)
            .unwrap_or(0),
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Anthropic messages API provider.
#[derive(Debug, Clone)]
pub struct ClaudeProvider {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl ClaudeProvider {
    /// Create a new Claude provider instance.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let api_request = build_request(&self.model, request);

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(ANTHROPIC_API_BASE)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain_request() -> LlmRequest {
        LlmRequest::new("You are a negotiator.", "Evaluate this quote.")
    }

    #[test]
    fn test_build_request_defaults() {
        let req = build_request("claude-sonnet", &plain_request());
        assert_eq!(req.model, "claude-sonnet");
        assert_eq!(req.max_tokens, DEFAULT_MAX_TOKENS);
        assert!((req.temperature - 0.0).abs() < f32::EPSILON);
        assert_eq!(req.system, "You are a negotiator.");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, "user");
        assert!(req.tools.is_empty());
        assert!(req.tool_choice.is_none());
    }

    #[test]
    fn test_build_request_with_schema_forces_tool() {
        let request = plain_request()
            .with_output_schema("evaluate_escalation", json!({"type": "object"}));
        let req = build_request("m", &request);
        assert_eq!(req.tools.len(), 1);
        assert_eq!(req.tools[0].name, "evaluate_escalation");
        let choice = req.tool_choice.expect("tool_choice should be set");
        assert_eq!(choice["type"], "tool");
        assert_eq!(choice["name"], "evaluate_escalation");
    }

    #[test]
    fn test_build_request_serializes_without_empty_tools() {
        let body = serde_json::to_value(build_request("m", &plain_request()))
            .expect("should serialize");
        assert!(body.get("tools").is_none(), "empty tools must be omitted");
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_parse_response_text() {
        let body = json!({
            "content": [{"type": "text", "text": "Overall Action: ACCEPT"}],
            "model": "claude-sonnet-4-20250514",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        });
        let parsed = parse_response(&body.to_string()).expect("should parse");
        assert_eq!(parsed.content, "Overall Action: ACCEPT");
        assert_eq!(parsed.model, "claude-sonnet-4-20250514");
        assert_eq!(parsed.input_tokens, 12);
        assert_eq!(parsed.output_tokens, 7);
    }

    #[test]
    fn test_parse_response_tool_use_wins() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Here is my analysis:"},
                {"type": "tool_use", "id": "t1", "name": "evaluate_escalation",
                 "input": {"shouldEscalate": true, "severity": "critical"}}
            ],
            "model": "claude-sonnet",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });
        let parsed = parse_response(&body.to_string()).expect("should parse");
        let payload: serde_json::Value =
            serde_json::from_str(&parsed.content).expect("content should be JSON");
        assert_eq!(payload["shouldEscalate"], true);
        assert_eq!(payload["severity"], "critical");
    }

    #[test]
    fn test_parse_response_empty_content_is_error() {
        let body = json!({"content": [], "model": "m"});
        let result = parse_response(&body.to_string());
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_parse_response_missing_usage_defaults_to_zero() {
        let body = json!({
            "content": [{"type": "text", "text": "ok"}],
            "model": "m"
        });
        let parsed = parse_response(&body.to_string()).expect("should parse");
        assert_eq!(parsed.input_tokens, 0);
        assert_eq!(parsed.output_tokens, 0);
    }

    #[test]
    fn test_provider_name_and_model() {
        let provider = ClaudeProvider::new("claude-sonnet", "key");
        assert_eq!(provider.name(), "claude");
        assert_eq!(provider.model_id(), "claude-sonnet");
    }
}
