//! Pipeline facade -- the single entry point consumers call.
//!
//! Wires the experts, orchestrator, and response generator over one shared
//! [`LlmService`], aggregates the accounting from every LLM call in the
//! invocation, and assembles the final [`AgentDecision`].
//!
//! `process` never fails: when every LLM call in an invocation fails, the
//! escalation expert's fail-closed default and the orchestrator's
//! never-fail policy produce an `escalate` decision carrying the
//! diagnostic. Only [`NegotiationPipeline::generate_initial_email`] can
//! return an error, because first outreach has no fail-safe artifact.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::experts::{ExpertSet, ExpertTokenCaps};
use crate::llm::{LlmService, ServiceError};
use crate::orchestrator::{Orchestrator, OrchestratorInput, DEFAULT_MAX_ITERATIONS};
use crate::parser::parse_json_object;
use crate::providers::LlmRequest;
use crate::response::{ResponseGenerator, ResponseInput};
use crate::types::{
    AgentAction, AgentDecision, ExpertAnalysis, ExtractedQuoteData, InitialEmail,
    NeedsAssessment, NegotiationStyle, OrderContext, ResponseArtifact,
};

/// Initial-outreach drafting prompt.
const INITIAL_EMAIL_SYSTEM_PROMPT: &str = "\
You draft the first outreach email from a merchant to a supplier about a \
product the merchant wants to buy. Be concise, professional, and specific \
about the product and quantity. Follow the requested opening style.

Output a single JSON object:
{
  \"subjectLine\": string,
  \"emailText\": string
}";

/// Errors surfaced by the pipeline facade.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Every provider attempt failed for a call with no fail-safe outcome.
    #[error(transparent)]
    AllProvidersExhausted(#[from] ServiceError),
}

/// Everything one `process` invocation needs. The caller renders
/// `conversation_history` via
/// [`ConversationContext::format_for_prompt`](crate::context::ConversationContext::format_for_prompt)
/// and carries `prior_extracted_data` between turns.
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    /// The supplier message to act on.
    pub supplier_message: String,
    /// Merchant negotiation rules, free-form text.
    pub negotiation_rules: String,
    /// Merchant escalation triggers, free-form text.
    pub escalation_triggers: String,
    /// Merchant-side order facts.
    pub order_context: OrderContext,
    /// Rendered conversation history.
    pub conversation_history: String,
    /// Cumulative merged extraction from earlier turns.
    pub prior_extracted_data: Option<ExtractedQuoteData>,
    /// Standing instructions from the merchant.
    pub merchant_instructions: Option<String>,
}

/// Tuning knobs for the facade.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Orchestrator iteration cap.
    pub max_iterations: u32,
    /// Per-expert token caps.
    pub expert_caps: ExpertTokenCaps,
    /// Token cap for synthesis calls.
    pub orchestrator_max_tokens: Option<u32>,
    /// Token cap for drafting calls (counter/clarify/outreach).
    pub response_max_tokens: Option<u32>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            expert_caps: ExpertTokenCaps::default(),
            orchestrator_max_tokens: None,
            response_max_tokens: None,
        }
    }
}

/// The negotiation pipeline. Owns one instance of each expert, the
/// orchestrator, and the response generator, all sharing one stateless
/// [`LlmService`].
pub struct NegotiationPipeline {
    service: Arc<LlmService>,
    experts: ExpertSet,
    orchestrator: Orchestrator,
    generator: ResponseGenerator,
    response_max_tokens: Option<u32>,
}

impl NegotiationPipeline {
    /// Wire the pipeline over a shared service.
    pub fn new(service: Arc<LlmService>, options: PipelineOptions) -> Self {
        let experts = ExpertSet::new(&service, options.expert_caps);
        let orchestrator = Orchestrator::new(
            Arc::clone(&service),
            options.max_iterations,
            options.orchestrator_max_tokens,
        );
        let generator = ResponseGenerator::new(Arc::clone(&service), options.response_max_tokens);
        Self {
            service,
            experts,
            orchestrator,
            generator,
            response_max_tokens: options.response_max_tokens,
        }
    }

    /// Process one supplier message into an [`AgentDecision`].
    ///
    /// Drives the expert fan-out, the orchestrator loop, and the response
    /// generator, then aggregates token/latency/attempt accounting across
    /// every LLM call made. Total LLM failure yields a fail-safe
    /// `escalate` decision rather than an error.
    pub async fn process(&self, request: &ProcessRequest) -> AgentDecision {
        let decision_id = Uuid::new_v4();
        info!(%decision_id, "pipeline invocation started");

        let outcome = self
            .orchestrator
            .run(
                &self.experts,
                &OrchestratorInput {
                    supplier_message: &request.supplier_message,
                    negotiation_rules: &request.negotiation_rules,
                    escalation_triggers: &request.escalation_triggers,
                    order_context: &request.order_context,
                    conversation_history: &request.conversation_history,
                    prior_extracted_data: request.prior_extracted_data.as_ref(),
                    merchant_instructions: request.merchant_instructions.as_deref(),
                },
            )
            .await;

        // Fold this turn's extraction into the caller-supplied prior data.
        let merged = merge_turn_extraction(
            request.prior_extracted_data.as_ref(),
            &outcome.opinions,
        );
        let needs = needs_assessment(&outcome.opinions);

        let generated = self
            .generator
            .generate(&ResponseInput {
                action: outcome.action,
                reasoning: &outcome.reasoning,
                extracted_data: merged.as_ref(),
                order_context: &request.order_context,
                negotiation_rules: &request.negotiation_rules,
                needs,
            })
            .await;

        // The artifact is authoritative: drafting that degraded to an
        // escalation makes the whole decision an escalation.
        let action = action_of(&generated.artifact);

        let mut totals = outcome.totals;
        totals.merge(generated.totals);

        info!(
            %decision_id,
            action = %action,
            llm_calls = totals.llm_calls,
            input_tokens = totals.input_tokens,
            output_tokens = totals.output_tokens,
            "pipeline invocation finished"
        );

        AgentDecision {
            decision_id,
            action,
            reasoning: outcome.reasoning,
            extracted_data: merged,
            expert_opinions: outcome.opinions,
            orchestrator_trace: outcome.trace,
            response: generated.artifact,
            total_llm_calls: totals.llm_calls,
            total_input_tokens: totals.input_tokens,
            total_output_tokens: totals.output_tokens,
            total_latency_ms: totals.latency_ms,
            attempts: totals.attempts,
        }
    }

    /// Draft the first outreach email for an order. One LLM call, no
    /// experts, no loop.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AllProvidersExhausted`] when every provider
    /// attempt fails -- unlike `process`, first outreach has no fail-safe
    /// artifact to degrade to.
    pub async fn generate_initial_email(
        &self,
        order_context: &OrderContext,
    ) -> Result<InitialEmail, PipelineError> {
        let request = LlmRequest::new(
            INITIAL_EMAIL_SYSTEM_PROMPT,
            compose_outreach_message(order_context),
        )
        .with_max_tokens(self.response_max_tokens);

        let call = self.service.call(&request).await?;
        let (subject_line, email_text) = parse_outreach(&call.response.content, order_context);

        Ok(InitialEmail {
            subject_line,
            email_text,
            provider: call.response.provider,
            model: call.response.model,
            input_tokens: call.response.input_tokens,
            output_tokens: call.response.output_tokens,
            latency_ms: call.response.latency_ms,
        })
    }
}

/// Merge the extraction opinion of this turn into the prior data.
fn merge_turn_extraction(
    prior: Option<&ExtractedQuoteData>,
    opinions: &[crate::types::ExpertOpinion],
) -> Option<ExtractedQuoteData> {
    let turn_data = opinions.iter().find_map(|opinion| match &opinion.analysis {
        ExpertAnalysis::Extraction {
            success: true,
            extracted_data: Some(data),
            ..
        } => Some(data),
        _ => None,
    });

    match (prior, turn_data) {
        (Some(prior), Some(turn)) => {
            let mut merged = prior.clone();
            merged.merge(turn);
            Some(merged)
        }
        (Some(prior), None) => Some(prior.clone()),
        (None, Some(turn)) => Some(turn.clone()),
        (None, None) => None,
    }
}

/// The needs expert's assessment, when it produced one.
fn needs_assessment(opinions: &[crate::types::ExpertOpinion]) -> Option<&NeedsAssessment> {
    opinions.iter().find_map(|opinion| match &opinion.analysis {
        ExpertAnalysis::Needs { assessment, .. } => Some(assessment),
        _ => None,
    })
}

/// The action an artifact materializes.
fn action_of(artifact: &ResponseArtifact) -> AgentAction {
    match artifact {
        ResponseArtifact::Approval(_) => AgentAction::Accept,
        ResponseArtifact::Counter(_) => AgentAction::Counter,
        ResponseArtifact::Clarification { .. } => AgentAction::Clarify,
        ResponseArtifact::Escalation { .. } => AgentAction::Escalate,
    }
}

fn compose_outreach_message(order: &OrderContext) -> String {
    let style = match order.negotiation_style {
        Some(NegotiationStyle::StatePriceUpfront) => {
            let target = order
                .last_known_price
                .map(|p| format!(" Our target price is ${p}/unit."))
                .unwrap_or_default();
            format!("State our terms upfront and ask the supplier to confirm.{target}")
        }
        _ => "Ask for a full quote without revealing a target price.".to_owned(),
    };

    let mut message = format!(
        "## Product\n{} (supplier ref {})",
        order.sku_name, order.supplier_sku
    );
    if let Some(quantity) = &order.quantity_requested {
        message.push_str(&format!("\nQuantity: {quantity}"));
    }
    message.push_str(&format!("\n\n## Opening Style\n{style}"));
    message
}

/// Read `{subjectLine, emailText}` tolerantly; fall back to using the raw
/// reply as the body under a generated subject.
fn parse_outreach(content: &str, order: &OrderContext) -> (String, String) {
    if let Ok(value) = parse_json_object(content) {
        let subject = value
            .get("subjectLine")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let body = value
            .get("emailText")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let (Some(subject), Some(body)) = (subject, body) {
            return (subject.to_owned(), body.to_owned());
        }
    }
    (
        format!("Quote request: {}", order.sku_name),
        content.trim().to_owned(),
    )
}
