//! Orchestrator -- gathers expert opinions and decides the agent's action.
//!
//! One run is a bounded loop:
//! 1. fan the three experts out concurrently and collect their opinions in
//!    declared order (extraction, escalation, needs),
//! 2. synthesize with a single LLM call whose prompt embeds every opinion
//!    plus the merchant's rules and the conversation,
//! 3. if the model asks for a follow-up and the iteration budget allows,
//!    re-invoke only the named expert and synthesize again.
//!
//! Two policies override whatever the synthesis model says: a high or
//! critical escalation verdict forces `escalate`, and any failure or
//! ambiguity resolves to `escalate`. The orchestrator itself never fails.

use std::sync::Arc;

use tracing::{info, warn};

use crate::experts::escalation::EscalationInput;
use crate::experts::extraction::ExtractionInput;
use crate::experts::needs::NeedsInput;
use crate::experts::{ExpertReport, ExpertSet};
use crate::llm::{CallTotals, LlmService};
use crate::parser::{extract_xml_tag, parse_decision, parse_followup};
use crate::providers::LlmRequest;
use crate::types::{
    AgentAction, EscalationAssessment, ExpertAnalysis, ExpertKind, ExpertOpinion,
    ExtractedQuoteData, FollowupRequest, IterationTrace, OrchestratorTrace, OrderContext, Severity,
};

/// Default cap on synthesis iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 2;

/// Synthesis role prompt defining the required output blocks.
const ORCHESTRATOR_SYSTEM_PROMPT: &str = "\
You are the lead negotiator for a merchant buying from suppliers. Three \
specialist analyses of the supplier's latest message are provided: a data \
extraction, an escalation-trigger review, and a missing-information \
assessment. Weigh them against the merchant's rules and decide one action.

Actions:
- ACCEPT: the quote satisfies the merchant's rules; propose approval
- COUNTER: terms are close but not acceptable; push back with a counter
- CLARIFY: information the rules depend on is missing; ask the supplier
- ESCALATE: a human must take over

Respond in exactly this format:

<systematic_evaluation>
Walk through each rule against the known data. Note which specialist \
findings you relied on and which you discounted.
</systematic_evaluation>

<decision>
Explain the action in two or three sentences, then end with a line:
Overall Action: ACCEPT|COUNTER|CLARIFY|ESCALATE
</decision>

If one specialist should re-examine something first, add (at most once):
<request_followup>expert=extraction|escalation|needs; question=your question</request_followup>

Only request a follow-up when the answer could change the action.";

/// Everything the orchestrator needs for one run.
#[derive(Debug, Clone)]
pub struct OrchestratorInput<'a> {
    /// The supplier message under consideration.
    pub supplier_message: &'a str,
    /// Merchant negotiation rules, free-form text.
    pub negotiation_rules: &'a str,
    /// Merchant escalation triggers, free-form text.
    pub escalation_triggers: &'a str,
    /// Merchant-side order facts.
    pub order_context: &'a OrderContext,
    /// Rendered conversation history.
    pub conversation_history: &'a str,
    /// Cumulative merged extraction from earlier turns.
    pub prior_extracted_data: Option<&'a ExtractedQuoteData>,
    /// Standing instructions from the merchant, when any.
    pub merchant_instructions: Option<&'a str>,
}

/// Result of one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    /// The decided action.
    pub action: AgentAction,
    /// Reasoning behind the action (the model's decision block, or a
    /// diagnostic when synthesis failed).
    pub reasoning: String,
    /// Final opinions in declared order: extraction, escalation, needs.
    pub opinions: Vec<ExpertOpinion>,
    /// Per-iteration audit trail.
    pub trace: OrchestratorTrace,
    /// Accounting for every LLM call made during the run.
    pub totals: CallTotals,
}

/// The synthesis component. Stateless; holds the shared service and the
/// iteration budget.
pub struct Orchestrator {
    service: Arc<LlmService>,
    max_iterations: u32,
    max_tokens: Option<u32>,
}

impl Orchestrator {
    /// Create an orchestrator with the given iteration cap (≥ 1).
    pub fn new(service: Arc<LlmService>, max_iterations: u32, max_tokens: Option<u32>) -> Self {
        Self {
            service,
            max_iterations: max_iterations.max(1),
            max_tokens,
        }
    }

    /// Run the gather-synthesize-decide loop.
    ///
    /// Never fails: total synthesis failure resolves to
    /// [`AgentAction::Escalate`] with a diagnostic reasoning.
    pub async fn run(
        &self,
        experts: &ExpertSet,
        input: &OrchestratorInput<'_>,
    ) -> OrchestratorOutcome {
        let mut totals = CallTotals::default();

        // Fan out. Declared opinion order is extraction, escalation, needs,
        // independent of completion order.
        let extraction_input = ExtractionInput {
            supplier_message: input.supplier_message,
            conversation_history: non_empty(input.conversation_history),
            prior_extracted_data: input.prior_extracted_data,
            additional_question: None,
        };
        let escalation_input = EscalationInput {
            supplier_message: input.supplier_message,
            escalation_triggers: input.escalation_triggers,
            extracted_data: input.prior_extracted_data,
            conversation_history: non_empty(input.conversation_history),
            order_context: input.order_context,
            additional_question: None,
        };
        let needs_input = NeedsInput {
            extracted_data: input.prior_extracted_data,
            negotiation_rules: input.negotiation_rules,
            order_context: input.order_context,
            additional_question: None,
            conversation_history: non_empty(input.conversation_history),
        };
        let (extraction, escalation, needs) = tokio::join!(
            experts.extraction.analyze(&extraction_input),
            experts.escalation.analyze(&escalation_input),
            experts.needs.analyze(&needs_input),
        );

        let mut opinions: Vec<ExpertOpinion> = Vec::with_capacity(3);
        for report in [extraction, escalation, needs] {
            record_report(&mut totals, &report);
            opinions.push(report.opinion);
        }

        let mut trace = OrchestratorTrace::default();

        loop {
            let iteration = trace.total_iterations.saturating_add(1);
            trace.total_iterations = iteration;
            info!(iteration, "orchestrator synthesis");

            let request = LlmRequest::new(
                ORCHESTRATOR_SYSTEM_PROMPT,
                compose_synthesis_message(&opinions, input),
            )
            .with_max_tokens(self.max_tokens);

            let content = match self.service.call(&request).await {
                Ok(call) => {
                    totals.record(
                        &call.attempts,
                        call.response.input_tokens,
                        call.response.output_tokens,
                        call.response.latency_ms,
                    );
                    call.response.content
                }
                Err(e) => {
                    warn!(error = %e, "synthesis call failed, escalating");
                    totals.record(e.attempts(), 0, 0, 0);
                    trace.iterations.push(IterationTrace {
                        iteration,
                        evaluation: None,
                        action: Some(AgentAction::Escalate),
                        followup: None,
                    });
                    return self.finish(
                        AgentAction::Escalate,
                        format!("orchestrator synthesis failed: {e}"),
                        opinions,
                        trace,
                        totals,
                    );
                }
            };

            let evaluation = extract_xml_tag(&content, "systematic_evaluation");
            let decision_block = extract_xml_tag(&content, "decision");
            let followup = parse_followup(&content);

            if let Some(wanted) = followup.as_ref() {
                if iteration < self.max_iterations {
                    info!(expert = wanted.expert.as_str(), "follow-up requested");
                    trace.iterations.push(IterationTrace {
                        iteration,
                        evaluation,
                        action: None,
                        followup: followup.clone(),
                    });
                    let report = self.reinvoke(experts, input, wanted).await;
                    record_report(&mut totals, &report);
                    replace_opinion(&mut opinions, report.opinion);
                    continue;
                }
                // Budget spent: decide with the opinions in hand.
                warn!(
                    expert = wanted.expert.as_str(),
                    "follow-up requested past iteration budget, ignoring"
                );
            }

            let action = parse_decision(&content);
            let reasoning = decision_block
                .or_else(|| evaluation.clone())
                .unwrap_or_else(|| content.trim().to_owned());

            trace.iterations.push(IterationTrace {
                iteration,
                evaluation,
                action: Some(action),
                followup,
            });

            return self.finish(action, reasoning, opinions, trace, totals);
        }
    }

    /// Re-invoke the single expert named by a follow-up request.
    async fn reinvoke(
        &self,
        experts: &ExpertSet,
        input: &OrchestratorInput<'_>,
        followup: &FollowupRequest,
    ) -> ExpertReport {
        let question = Some(followup.question.as_str());
        match followup.expert {
            ExpertKind::Extraction => {
                experts
                    .extraction
                    .analyze(&ExtractionInput {
                        supplier_message: input.supplier_message,
                        conversation_history: non_empty(input.conversation_history),
                        prior_extracted_data: input.prior_extracted_data,
                        additional_question: question,
                    })
                    .await
            }
            ExpertKind::Escalation => {
                experts
                    .escalation
                    .analyze(&EscalationInput {
                        supplier_message: input.supplier_message,
                        escalation_triggers: input.escalation_triggers,
                        extracted_data: input.prior_extracted_data,
                        conversation_history: non_empty(input.conversation_history),
                        order_context: input.order_context,
                        additional_question: question,
                    })
                    .await
            }
            ExpertKind::Needs => {
                experts
                    .needs
                    .analyze(&NeedsInput {
                        extracted_data: input.prior_extracted_data,
                        negotiation_rules: input.negotiation_rules,
                        order_context: input.order_context,
                        additional_question: question,
                        conversation_history: non_empty(input.conversation_history),
                    })
                    .await
            }
        }
    }

    /// Apply the escalation-severity override and assemble the outcome.
    fn finish(
        &self,
        action: AgentAction,
        reasoning: String,
        opinions: Vec<ExpertOpinion>,
        trace: OrchestratorTrace,
        totals: CallTotals,
    ) -> OrchestratorOutcome {
        let (action, reasoning) = match forced_escalation(&opinions) {
            Some(assessment) if action != AgentAction::Escalate => {
                info!(severity = %assessment.severity, "escalation severity overrides synthesis");
                (
                    AgentAction::Escalate,
                    format!(
                        "Escalation triggered ({} severity): {}",
                        assessment.severity, assessment.reasoning
                    ),
                )
            }
            _ => (action, reasoning),
        };

        OrchestratorOutcome {
            action,
            reasoning,
            opinions,
            trace,
            totals,
        }
    }
}

/// A high/critical escalation verdict that must override the synthesis.
fn forced_escalation(opinions: &[ExpertOpinion]) -> Option<&EscalationAssessment> {
    opinions.iter().find_map(|opinion| match &opinion.analysis {
        ExpertAnalysis::Escalation { assessment, .. }
            if assessment.should_escalate && assessment.severity >= Severity::High =>
        {
            Some(assessment)
        }
        _ => None,
    })
}

/// Swap the freshly re-invoked expert's opinion into the declared-order slot.
fn replace_opinion(opinions: &mut [ExpertOpinion], fresh: ExpertOpinion) {
    if let Some(slot) = opinions
        .iter_mut()
        .find(|o| o.expert_name == fresh.expert_name)
    {
        *slot = fresh;
    }
}

fn record_report(totals: &mut CallTotals, report: &ExpertReport) {
    totals.record(
        &report.attempts,
        report.opinion.input_tokens,
        report.opinion.output_tokens,
        report.opinion.latency_ms,
    );
}

fn non_empty(text: &str) -> Option<&str> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Assemble the synthesis user message: rules, instructions, order facts,
/// conversation, the supplier message, and every opinion in declared order.
fn compose_synthesis_message(opinions: &[ExpertOpinion], input: &OrchestratorInput<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "## Negotiation Rules\n{}",
        input.negotiation_rules.trim()
    ));

    if let Some(instructions) = input.merchant_instructions.map(str::trim).filter(|i| !i.is_empty())
    {
        sections.push(format!("## Merchant Instructions\n{instructions}"));
    }

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

    if !input.conversation_history.trim().is_empty() {
        sections.push(format!(
            "## Conversation History\n{}",
            input.conversation_history.trim()
        ));
    }

    sections.push(format!(
        "## Supplier's Latest Message\n{}",
        input.supplier_message
    ));

    let mut opinion_section = String::from("## Specialist Analyses");
    for opinion in opinions {
        let rendered = serde_json::to_string_pretty(&opinion.analysis)
            .unwrap_or_else(|_| "(unavailable)".to_owned());
        opinion_section.push_str(&format!("\n\n### {}\n{rendered}", opinion.expert_name));
    }
    sections.push(opinion_section);

    sections.join("\n\n")
}
