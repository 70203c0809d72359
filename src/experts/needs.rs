//! Needs expert -- identifies quote fields still missing and ranks the
//! follow-up questions worth asking.
//!
//! Ranking is relative to the merchant's negotiation rules: a field the
//! rules depend on (a lead-time cap, a price threshold) outranks a field
//! that is merely nice to know.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::LlmService;
use crate::parser::parse_json_object;
use crate::providers::LlmRequest;
use crate::types::{ExpertAnalysis, ExpertKind, ExtractedQuoteData, NeedsAssessment, OrderContext};

use super::{opinion_from_call, opinion_without_call, ExpertReport};

/// Schema name for the structured-output call.
const NEEDS_SCHEMA_NAME: &str = "analyze_needs";

/// Needs-assessment role prompt.
const NEEDS_SYSTEM_PROMPT: &str = "\
You are a procurement analyst. Given the merchant's negotiation rules and \
the quote data gathered so far, identify what is still missing and which \
follow-up questions to ask the supplier, most important first.

Rank strictly by what the rules need: if a rule depends on a field that is \
still unknown, questions resolving that field come first. Fields the rules \
never mention rank last, however interesting. Do not ask about fields \
already known.";

/// JSON Schema for [`NEEDS_SCHEMA_NAME`].
fn needs_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "missingFields": {"type": "array", "items": {"type": "string"}},
            "prioritizedQuestions": {"type": "array", "items": {"type": "string"}},
            "reasoning": {"type": "string"}
        },
        "required": ["missingFields", "prioritizedQuestions", "reasoning"]
    })
}

/// Wire shape the model is asked to emit.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeedsWire {
    #[serde(default)]
    missing_fields: Vec<String>,
    #[serde(default)]
    prioritized_questions: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

/// Input for one needs assessment.
#[derive(Debug, Clone)]
pub struct NeedsInput<'a> {
    /// Current merged quote data; `None` means nothing extracted yet.
    pub extracted_data: Option<&'a ExtractedQuoteData>,
    /// Merchant negotiation rules, free-form text.
    pub negotiation_rules: &'a str,
    /// Merchant-side order facts.
    pub order_context: &'a OrderContext,
    /// Orchestrator follow-up question, on re-invocation.
    pub additional_question: Option<&'a str>,
    /// Rendered conversation history, when any.
    pub conversation_history: Option<&'a str>,
}

/// Needs expert over the shared LLM service.
pub struct NeedsExpert {
    service: Arc<LlmService>,
    max_tokens: Option<u32>,
}

impl NeedsExpert {
    /// Create the expert with an optional per-call token cap.
    pub fn new(service: Arc<LlmService>, max_tokens: Option<u32>) -> Self {
        Self {
            service,
            max_tokens,
        }
    }

    /// Assess what is missing from the quote.
    ///
    /// Never fails: an LLM failure yields empty field/question lists with
    /// the failure noted in the reasoning.
    pub async fn analyze(&self, input: &NeedsInput<'_>) -> ExpertReport {
        let request = LlmRequest::new(NEEDS_SYSTEM_PROMPT, compose_user_message(input))
            .with_max_tokens(self.max_tokens)
            .with_output_schema(NEEDS_SCHEMA_NAME, needs_schema());

        match self.service.call(&request).await {
            Ok(call) => {
                let analysis = match parse_assessment(&call.response.content) {
                    Ok(assessment) => {
                        debug!(
                            missing = assessment.missing_fields.len(),
                            questions = assessment.prioritized_questions.len(),
                            "needs expert finished"
                        );
                        ExpertAnalysis::Needs {
                            assessment,
                            error: None,
                        }
                    }
                    Err(message) => {
                        warn!(error = %message, "needs payload unreadable");
                        ExpertAnalysis::Needs {
                            assessment: failed_assessment(&message),
                            error: Some(message),
                        }
                    }
                };
                ExpertReport {
                    opinion: opinion_from_call(ExpertKind::Needs.as_str(), &call, analysis),
                    attempts: call.attempts,
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "needs assessment failed");
                let analysis = ExpertAnalysis::Needs {
                    assessment: failed_assessment(&message),
                    error: Some(message),
                };
                let attempts = e.attempts().to_vec();
                ExpertReport {
                    opinion: opinion_without_call(
                        ExpertKind::Needs.as_str(),
                        &self.service,
                        analysis,
                    ),
                    attempts,
                }
            }
        }
    }
}

/// Empty assessment noting the failed check.
fn failed_assessment(error: &str) -> NeedsAssessment {
    NeedsAssessment {
        missing_fields: Vec::new(),
        prioritized_questions: Vec::new(),
        reasoning: format!("needs assessment failed: {error}"),
    }
}

fn parse_assessment(content: &str) -> Result<NeedsAssessment, String> {
    let value = parse_json_object(content).map_err(|e| e.to_string())?;
    let wire: NeedsWire = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok(NeedsAssessment {
        missing_fields: wire.missing_fields,
        prioritized_questions: wire.prioritized_questions,
        reasoning: wire.reasoning,
    })
}

fn compose_user_message(input: &NeedsInput<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "## Negotiation Rules\n{}",
        input.negotiation_rules.trim()
    ));

    let order = input.order_context;
    let mut order_section = format!(
        "## Order\nProduct: {} (supplier ref {})",
        order.sku_name, order.supplier_sku
    );
    if let Some(quantity) = &order.quantity_requested {
        order_section.push_str(&format!("\nQuantity requested: {quantity}"));
    }
    if let Some(price) = order.last_known_price {
        order_section.push_str(&format!("\nLast known price: ${price}"));
    }
    sections.push(order_section);

    match input.extracted_data.filter(|d| !d.is_empty()) {
        Some(data) => {
            let rendered =
                serde_json::to_string_pretty(data).unwrap_or_else(|_| "(unavailable)".to_owned());
            sections.push(format!("## Quote Data So Far\n{rendered}"));
        }
        None => sections.push("## Quote Data So Far\nNo data extracted".to_owned()),
    }

    if let Some(history) = input.conversation_history.filter(|h| !h.is_empty()) {
        sections.push(format!("## Conversation History\n{history}"));
    }

    if let Some(question) = input.additional_question.filter(|q| !q.is_empty()) {
        sections.push(format!("## Follow-up Question\n{question}"));
    }

    sections.join("\n\n")
}
