//! Response generator -- materializes a decided action into a concrete
//! artifact.
//!
//! Accept and escalate are computed locally. Counter and clarify each draft
//! an email with one LLM call; if that call fails the generator degrades to
//! an escalation artifact rather than failing the pipeline.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::llm::{CallTotals, LlmService};
use crate::parser::parse_json_object;
use crate::providers::LlmRequest;
use crate::types::{
    AgentAction, CounterOffer, ExtractedQuoteData, NeedsAssessment, OrderContext, ProposedApproval,
    ResponseArtifact,
};

/// Counter-offer drafting prompt.
const COUNTER_SYSTEM_PROMPT: &str = "\
You draft counter-offer emails for a merchant negotiating with a supplier. \
Using the supplier's current quote and the merchant's rules, push for \
terms that satisfy the rules. Stay professional and keep leverage: never \
reveal the merchant's internal thresholds, only the terms you propose.

Output a single JSON object:
{
  \"emailText\": string,              // the full reply email body
  \"proposedTermsSummary\": string    // one line, e.g. \"$4.00/unit, NET 30, 500 units\"
}";

/// Clarification drafting prompt.
const CLARIFY_SYSTEM_PROMPT: &str = "\
You draft follow-up emails for a merchant negotiating with a supplier. \
Ask the open questions listed, in the order given, in one concise and \
friendly email. Do not renegotiate terms and do not invent questions. \
Output only the email body text.";

/// Input for one response materialization.
#[derive(Debug, Clone)]
pub struct ResponseInput<'a> {
    /// The decided action.
    pub action: AgentAction,
    /// The orchestrator's reasoning.
    pub reasoning: &'a str,
    /// Current merged quote data, when any.
    pub extracted_data: Option<&'a ExtractedQuoteData>,
    /// Merchant-side order facts.
    pub order_context: &'a OrderContext,
    /// Merchant negotiation rules (supplies counter-offer targets).
    pub negotiation_rules: &'a str,
    /// The needs expert's assessment (supplies clarification questions).
    pub needs: Option<&'a NeedsAssessment>,
}

/// A materialized artifact plus the accounting for any LLM call made.
#[derive(Debug, Clone)]
pub struct GeneratedResponse {
    /// Exactly one artifact matching the action (or an escalation when
    /// drafting degraded).
    pub artifact: ResponseArtifact,
    /// Accounting for the drafting call, when one was made.
    pub totals: CallTotals,
}

/// Materializes decisions into approvals, drafted emails, or escalation
/// reasons.
pub struct ResponseGenerator {
    service: Arc<LlmService>,
    max_tokens: Option<u32>,
}

impl ResponseGenerator {
    /// Create the generator with an optional per-call token cap.
    pub fn new(service: Arc<LlmService>, max_tokens: Option<u32>) -> Self {
        Self {
            service,
            max_tokens,
        }
    }

    /// Materialize the action. Never fails: counter/clarify drafting
    /// failures produce an escalation artifact.
    pub async fn generate(&self, input: &ResponseInput<'_>) -> GeneratedResponse {
        match input.action {
            AgentAction::Accept => GeneratedResponse {
                artifact: ResponseArtifact::Approval(build_approval(input)),
                totals: CallTotals::default(),
            },
            AgentAction::Escalate => GeneratedResponse {
                artifact: ResponseArtifact::Escalation {
                    reason: input.reasoning.to_owned(),
                },
                totals: CallTotals::default(),
            },
            AgentAction::Counter => self.draft_counter(input).await,
            AgentAction::Clarify => self.draft_clarification(input).await,
        }
    }

    async fn draft_counter(&self, input: &ResponseInput<'_>) -> GeneratedResponse {
        let request = LlmRequest::new(COUNTER_SYSTEM_PROMPT, compose_counter_message(input))
            .with_max_tokens(self.max_tokens);

        let mut totals = CallTotals::default();
        match self.service.call(&request).await {
            Ok(call) => {
                totals.record(
                    &call.attempts,
                    call.response.input_tokens,
                    call.response.output_tokens,
                    call.response.latency_ms,
                );
                match parse_counter(&call.response.content) {
                    Ok(offer) => {
                        info!("counter-offer drafted");
                        GeneratedResponse {
                            artifact: ResponseArtifact::Counter(offer),
                            totals,
                        }
                    }
                    Err(message) => degraded(input, &message, totals),
                }
            }
            Err(e) => {
                totals.record(e.attempts(), 0, 0, 0);
                degraded(input, &e.to_string(), totals)
            }
        }
    }

    async fn draft_clarification(&self, input: &ResponseInput<'_>) -> GeneratedResponse {
        let request = LlmRequest::new(CLARIFY_SYSTEM_PROMPT, compose_clarify_message(input))
            .with_max_tokens(self.max_tokens);

        let mut totals = CallTotals::default();
        match self.service.call(&request).await {
            Ok(call) => {
                totals.record(
                    &call.attempts,
                    call.response.input_tokens,
                    call.response.output_tokens,
                    call.response.latency_ms,
                );
                let email = call.response.content.trim().to_owned();
                if email.is_empty() {
                    return degraded(input, "clarification draft came back empty", totals);
                }
                info!("clarification email drafted");
                GeneratedResponse {
                    artifact: ResponseArtifact::Clarification { email },
                    totals,
                }
            }
            Err(e) => {
                totals.record(e.attempts(), 0, 0, 0);
                degraded(input, &e.to_string(), totals)
            }
        }
    }
}

/// Degraded-but-safe outcome when drafting fails.
fn degraded(input: &ResponseInput<'_>, error: &str, totals: CallTotals) -> GeneratedResponse {
    warn!(action = %input.action, error, "drafting failed, degrading to escalation");
    GeneratedResponse {
        artifact: ResponseArtifact::Escalation {
            reason: format!(
                "{} email drafting failed ({error}); original reasoning: {}",
                input.action, input.reasoning
            ),
        },
        totals,
    }
}

/// Build the approval for an accepted quote.
///
/// Quantity coercion: the supplier's `available_quantity` wins; otherwise
/// the leading integer of `quantity_requested`; otherwise 0.
fn build_approval(input: &ResponseInput<'_>) -> ProposedApproval {
    let data = input.extracted_data;
    let quantity = data
        .and_then(|d| d.available_quantity)
        .or_else(|| {
            input
                .order_context
                .quantity_requested
                .as_deref()
                .and_then(parse_leading_quantity)
        })
        .unwrap_or(0);

    let price = data.and_then(|d| d.quoted_price).unwrap_or(0.0);
    let currency = data
        .and_then(|d| d.quoted_price_currency.clone())
        .unwrap_or_else(|| "USD".to_owned());
    let total = f64::from(quantity) * price;

    ProposedApproval {
        quantity,
        price,
        total,
        summary: format!(
            "Approve {} units of {} at {price} {currency}/unit ({total} {currency} total)",
            quantity, input.order_context.sku_name
        ),
    }
}

/// Pull the first run of digits out of a free-form quantity ("500 units").
fn parse_leading_quantity(text: &str) -> Option<u32> {
    let digits: String = text
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn parse_counter(content: &str) -> Result<CounterOffer, String> {
    let value = parse_json_object(content).map_err(|e| e.to_string())?;
    let email = value
        .get("emailText")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing emailText".to_owned())?;
    let terms = value
        .get("proposedTermsSummary")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    Ok(CounterOffer {
        draft_email: email.to_owned(),
        proposed_terms: terms.to_owned(),
    })
}

fn compose_counter_message(input: &ResponseInput<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "## Negotiation Rules (target terms)\n{}",
        input.negotiation_rules.trim()
    ));
    sections.push(format!(
        "## Order\nProduct: {} (supplier ref {})",
        input.order_context.sku_name, input.order_context.supplier_sku
    ));

    match input.extracted_data.filter(|d| !d.is_empty()) {
        Some(data) => {
            let rendered =
                serde_json::to_string_pretty(data).unwrap_or_else(|_| "(unavailable)".to_owned());
            sections.push(format!("## Supplier's Current Quote\n{rendered}"));
        }
        None => sections.push("## Supplier's Current Quote\n(none extracted)".to_owned()),
    }

    sections.push(format!("## Why We Are Countering\n{}", input.reasoning));
    sections.join("\n\n")
}

fn compose_clarify_message(input: &ResponseInput<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "## Order\nProduct: {} (supplier ref {})",
        input.order_context.sku_name, input.order_context.supplier_sku
    ));

    let questions: Vec<&str> = input
        .needs
        .map(|n| {
            n.prioritized_questions
                .iter()
                .map(String::as_str)
                .collect()
        })
        .unwrap_or_default();

    if questions.is_empty() {
        sections.push(
            "## Questions To Ask\nAsk the supplier for the quote details still needed to \
             evaluate the offer."
                .to_owned(),
        );
    } else {
        let mut listed = String::from("## Questions To Ask (in this order)");
        for (index, question) in questions.iter().enumerate() {
            listed.push_str(&format!("\n{}. {question}", index.saturating_add(1)));
        }
        sections.push(listed);
    }

    sections.push(format!("## Context\n{}", input.reasoning));
    sections.join("\n\n")
}
