//! Escalation expert -- evaluates merchant-defined triggers against the
//! current negotiation state.
//!
//! Fail-closed by policy: when the LLM call fails, the expert reports
//! `should_escalate=true` at high severity. It is always safe to involve a
//! human; the reverse is not true.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::LlmService;
use crate::parser::parse_json_object;
use crate::providers::LlmRequest;
use crate::types::{
    EscalationAssessment, ExpertAnalysis, ExpertKind, ExtractedQuoteData, OrderContext, Severity,
};

use super::{opinion_from_call, opinion_without_call, ExpertReport};

/// Schema name for the structured-output call.
const ESCALATION_SCHEMA_NAME: &str = "evaluate_escalation";

/// Escalation role prompt.
const ESCALATION_SYSTEM_PROMPT: &str = "\
You are an escalation reviewer for an automated procurement negotiator. \
The merchant has written conditions under which a human must take over the \
conversation. Evaluate each condition against the supplier's latest \
message and the negotiation state.

Judge only the listed conditions. Do not invent new ones, and do not \
escalate for ordinary negotiation friction the conditions do not cover.

Severity guide:
- low: a condition technically matched but poses no commercial risk
- medium: a human should look when convenient
- high: a human should review before the agent replies
- critical: stop immediately (e.g. product discontinued, legal threat, \
demand to bypass the platform)";

/// JSON Schema for [`ESCALATION_SCHEMA_NAME`].
fn escalation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "shouldEscalate": {"type": "boolean"},
            "reasoning": {"type": "string"},
            "triggersEvaluated": {"type": "array", "items": {"type": "string"}},
            "triggeredTriggers": {"type": "array", "items": {"type": "string"}},
            "severity": {"type": "string", "enum": ["low", "medium", "high", "critical"]}
        },
        "required": ["shouldEscalate", "reasoning", "severity"]
    })
}

/// Wire shape the model is asked to emit.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EscalationWire {
    should_escalate: bool,
    reasoning: String,
    #[serde(default)]
    triggers_evaluated: Vec<String>,
    #[serde(default)]
    triggered_triggers: Vec<String>,
    severity: Severity,
}

/// Input for one escalation evaluation.
#[derive(Debug, Clone)]
pub struct EscalationInput<'a> {
    /// The supplier message under evaluation.
    pub supplier_message: &'a str,
    /// Merchant-defined trigger conditions, free-form text.
    pub escalation_triggers: &'a str,
    /// Current merged quote data, when any.
    pub extracted_data: Option<&'a ExtractedQuoteData>,
    /// Rendered conversation history, when any.
    pub conversation_history: Option<&'a str>,
    /// Merchant-side order facts.
    pub order_context: &'a OrderContext,
    /// Orchestrator follow-up question, on re-invocation.
    pub additional_question: Option<&'a str>,
}

/// Escalation expert over the shared LLM service.
pub struct EscalationExpert {
    service: Arc<LlmService>,
    max_tokens: Option<u32>,
}

impl EscalationExpert {
    /// Create the expert with an optional per-call token cap.
    pub fn new(service: Arc<LlmService>, max_tokens: Option<u32>) -> Self {
        Self {
            service,
            max_tokens,
        }
    }

    /// Evaluate the merchant's triggers.
    ///
    /// Empty or whitespace-only triggers short-circuit with zero LLM calls.
    /// An LLM failure yields the fail-closed default (escalate, severity
    /// high) rather than an error.
    pub async fn analyze(&self, input: &EscalationInput<'_>) -> ExpertReport {
        if input.escalation_triggers.trim().is_empty() {
            debug!("no escalation triggers configured, skipping LLM call");
            let analysis = ExpertAnalysis::Escalation {
                assessment: EscalationAssessment {
                    should_escalate: false,
                    reasoning: "No escalation triggers configured".to_owned(),
                    triggers_evaluated: Vec::new(),
                    triggered_triggers: Vec::new(),
                    severity: Severity::Low,
                },
                error: None,
            };
            return ExpertReport {
                opinion: opinion_without_call(
                    ExpertKind::Escalation.as_str(),
                    &self.service,
                    analysis,
                ),
                attempts: Vec::new(),
            };
        }

        let request = LlmRequest::new(ESCALATION_SYSTEM_PROMPT, compose_user_message(input))
            .with_max_tokens(self.max_tokens)
            .with_output_schema(ESCALATION_SCHEMA_NAME, escalation_schema());

        match self.service.call(&request).await {
            Ok(call) => {
                let analysis = match parse_assessment(&call.response.content) {
                    Ok(assessment) => ExpertAnalysis::Escalation {
                        assessment,
                        error: None,
                    },
                    Err(message) => {
                        warn!(error = %message, "escalation payload unreadable, failing closed");
                        ExpertAnalysis::Escalation {
                            assessment: fail_closed(&message),
                            error: Some(message),
                        }
                    }
                };
                ExpertReport {
                    opinion: opinion_from_call(ExpertKind::Escalation.as_str(), &call, analysis),
                    attempts: call.attempts,
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "escalation check failed, failing closed");
                let analysis = ExpertAnalysis::Escalation {
                    assessment: fail_closed(&message),
                    error: Some(message),
                };
                let attempts = e.attempts().to_vec();
                ExpertReport {
                    opinion: opinion_without_call(
                        ExpertKind::Escalation.as_str(),
                        &self.service,
                        analysis,
                    ),
                    attempts,
                }
            }
        }
    }
}

/// The fail-closed default verdict.
fn fail_closed(error: &str) -> EscalationAssessment {
    EscalationAssessment {
        should_escalate: true,
        reasoning: format!("escalation check failed: {error}"),
        triggers_evaluated: Vec::new(),
        triggered_triggers: Vec::new(),
        severity: Severity::High,
    }
}

fn parse_assessment(content: &str) -> Result<EscalationAssessment, String> {
    let value = parse_json_object(content).map_err(|e| e.to_string())?;
    let wire: EscalationWire = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok(EscalationAssessment {
        should_escalate: wire.should_escalate,
        reasoning: wire.reasoning,
        triggers_evaluated: wire.triggers_evaluated,
        triggered_triggers: wire.triggered_triggers,
        severity: wire.severity,
    })
}

/// Assemble the user message: triggers, the supplier message, and whatever
/// state exists.
fn compose_user_message(input: &EscalationInput<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "## Escalation Conditions\n{}",
        input.escalation_triggers.trim()
    ));
    sections.push(format!("## Supplier Message\n{}", input.supplier_message));
    sections.push(format!(
        "## Order\nProduct: {} (supplier ref {})",
        input.order_context.sku_name, input.order_context.supplier_sku
    ));

    if let Some(data) = input.extracted_data.filter(|d| !d.is_empty()) {
        let rendered =
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "(unavailable)".to_owned());
        sections.push(format!("## Current Quote Data\n{rendered}"));
    }

    if let Some(history) = input.conversation_history.filter(|h| !h.is_empty()) {
        sections.push(format!("## Conversation History\n{history}"));
    }

    if let Some(question) = input.additional_question.filter(|q| !q.is_empty()) {
        sections.push(format!("## Follow-up Question\n{question}"));
    }

    sections.join("\n\n")
}
