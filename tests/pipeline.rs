//! End-to-end pipeline tests with scripted mock providers.
//!
//! Each test wires a [`NegotiationPipeline`] over providers whose replies
//! are keyed off the system prompt, so every expert, the orchestrator, and
//! the response generator can be steered independently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use haggle::llm::{LlmService, RetryConfig};
use haggle::pipeline::{NegotiationPipeline, PipelineOptions, ProcessRequest};
use haggle::providers::{LlmProvider, LlmRequest, LlmResponse, ProviderError};
use haggle::types::{
    AgentAction, ExpertAnalysis, OrderContext, ResponseArtifact, Severity,
};

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

type Script = Box<dyn Fn(&LlmRequest) -> Result<String, String> + Send + Sync>;

/// Mock provider whose responses come from a closure; records every call.
struct ScriptedProvider {
    name: String,
    calls: Mutex<Vec<(String, String)>>,
    script: Script,
}

impl ScriptedProvider {
    fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_owned(),
            calls: Mutex::new(Vec::new()),
            script,
        }
    }

    /// System prompts of every call made so far, in order.
    fn seen_roles(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .map(|(system, _)| role_of(system).to_owned())
            .collect()
    }

    /// User messages sent to calls whose system prompt matched `role`.
    fn user_messages_for(&self, role: &str) -> Vec<String> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|(system, _)| role_of(system) == role)
            .map(|(_, user)| user.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        self.calls
            .lock()
            .expect("lock")
            .push((request.system_prompt.clone(), request.user_message.clone()));
        match (self.script)(request) {
            Ok(content) => Ok(LlmResponse {
                content,
                provider: self.name.clone(),
                model: "scripted-model".to_owned(),
                input_tokens: 100,
                output_tokens: 50,
                latency_ms: 5,
            }),
            Err(error) => Err(ProviderError::HttpStatus {
                status: 500,
                body: error,
            }),
        }
    }
}

/// Classify a call by its system prompt.
fn role_of(system_prompt: &str) -> &'static str {
    if system_prompt.contains("data extraction specialist") {
        "extraction"
    } else if system_prompt.contains("escalation reviewer") {
        "escalation"
    } else if system_prompt.contains("procurement analyst") {
        "needs"
    } else if system_prompt.contains("lead negotiator") {
        "orchestrator"
    } else if system_prompt.contains("counter-offer emails") {
        "counter"
    } else if system_prompt.contains("follow-up emails") {
        "clarify"
    } else if system_prompt.contains("first outreach email") {
        "outreach"
    } else {
        "unknown"
    }
}

// ---------------------------------------------------------------------------
// Canned replies
// ---------------------------------------------------------------------------

fn extraction_reply(price: f64, moq: Option<u32>, lead: Option<(u32, u32)>) -> String {
    let mut payload = serde_json::json!({
        "quotedPrice": price,
        "quotedPriceCurrency": "USD",
        "confidence": 0.95
    });
    if let Some(moq) = moq {
        payload["moq"] = serde_json::json!(moq);
    }
    if let Some((min, max)) = lead {
        payload["leadTimeMinDays"] = serde_json::json!(min);
        payload["leadTimeMaxDays"] = serde_json::json!(max);
        payload["paymentTerms"] = serde_json::json!("NET 30");
    }
    payload.to_string()
}

fn no_escalation_reply() -> String {
    serde_json::json!({
        "shouldEscalate": false,
        "reasoning": "no trigger fired",
        "triggersEvaluated": ["Product discontinued"],
        "triggeredTriggers": [],
        "severity": "low"
    })
    .to_string()
}

fn critical_escalation_reply() -> String {
    serde_json::json!({
        "shouldEscalate": true,
        "reasoning": "The supplier states the product is discontinued.",
        "triggersEvaluated": ["Product discontinued"],
        "triggeredTriggers": ["Product discontinued"],
        "severity": "critical"
    })
    .to_string()
}

fn needs_reply(missing: &[&str], questions: &[&str]) -> String {
    serde_json::json!({
        "missingFields": missing,
        "prioritizedQuestions": questions,
        "reasoning": "ranked against the active rules"
    })
    .to_string()
}

fn decision_reply(action: &str) -> String {
    format!(
        "<systematic_evaluation>\nChecked each rule against the data.\n</systematic_evaluation>\n\
         <decision>\nThe analyses support this action.\nOverall Action: {action}\n</decision>"
    )
}

fn standard_order() -> OrderContext {
    OrderContext {
        sku_name: "Widget A".to_owned(),
        supplier_sku: "W-100".to_owned(),
        quantity_requested: Some("500".to_owned()),
        last_known_price: Some(4.8),
        negotiation_style: None,
    }
}

fn request_with(message: &str, rules: &str, triggers: &str) -> ProcessRequest {
    ProcessRequest {
        supplier_message: message.to_owned(),
        negotiation_rules: rules.to_owned(),
        escalation_triggers: triggers.to_owned(),
        order_context: standard_order(),
        conversation_history: String::new(),
        prior_extracted_data: None,
        merchant_instructions: None,
    }
}

fn pipeline_over(provider: Arc<ScriptedProvider>) -> NegotiationPipeline {
    let service = LlmService::new(
        provider as Arc<dyn LlmProvider>,
        None,
        RetryConfig {
            max_retries_per_provider: 1,
            retry_delay: Duration::ZERO,
        },
    );
    NegotiationPipeline::new(Arc::new(service), PipelineOptions::default())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_quote_is_accepted() {
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                "extraction" => extraction_reply(4.5, Some(500), Some((25, 30))),
                "escalation" => no_escalation_reply(),
                "needs" => needs_reply(&[], &[]),
                "orchestrator" => decision_reply("ACCEPT"),
                other => panic!("unexpected call: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with(
            "$4.50/unit, MOQ 500, 25-30 day lead time, NET 30",
            "Accept if price <= $5 and lead time <= 30 days",
            "Product discontinued",
        ))
        .await;

    assert_eq!(decision.action, AgentAction::Accept);
    let ResponseArtifact::Approval(approval) = &decision.response else {
        panic!("expected approval, got {:?}", decision.response);
    };
    assert!((approval.price - 4.5).abs() < f64::EPSILON);
    assert_eq!(approval.quantity, 500, "falls back to requested quantity");
    assert!((approval.total - 2250.0).abs() < f64::EPSILON);

    let data = decision.extracted_data.expect("extraction should land");
    assert_eq!(data.lead_time_min_days, Some(25));
    assert_eq!(data.payment_terms.as_deref(), Some("NET 30"));

    // Fan-out plus one synthesis, no drafting call for accept.
    assert_eq!(decision.total_llm_calls, 4);
    assert_eq!(decision.attempts.len(), 4);
    assert!(decision.attempts.iter().all(|a| a.success));
    assert_eq!(decision.total_input_tokens, 400);
    assert_eq!(decision.total_output_tokens, 200);
    assert_eq!(decision.orchestrator_trace.total_iterations, 1);
}

#[tokio::test]
async fn overpriced_quote_is_countered() {
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                "extraction" => extraction_reply(6.0, None, None),
                "escalation" => no_escalation_reply(),
                "needs" => needs_reply(&[], &[]),
                "orchestrator" => decision_reply("COUNTER"),
                "counter" => serde_json::json!({
                    "emailText": "Thanks for the quote. We can move forward at $4.00/unit for 500 units.",
                    "proposedTermsSummary": "$4.00/unit, 500 units"
                })
                .to_string(),
                other => panic!("unexpected call: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with(
            "$6.00/unit",
            "Counter if price > $5; target $4",
            "",
        ))
        .await;

    assert_eq!(decision.action, AgentAction::Counter);
    let ResponseArtifact::Counter(offer) = &decision.response else {
        panic!("expected counter, got {:?}", decision.response);
    };
    assert!(offer.draft_email.contains("$4"), "draft mentions the target");

    // The counter prompt carries the rules (the target terms source).
    let counter_prompts = provider.user_messages_for("counter");
    assert_eq!(counter_prompts.len(), 1);
    assert!(counter_prompts[0].contains("target $4"));
}

#[tokio::test]
async fn discontinued_product_escalates_regardless_of_synthesis() {
    // The synthesis model says ACCEPT; the critical escalation verdict must
    // still win.
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                "extraction" => r#"{"confidence": 0, "notes": ["no quote data present"]}"#.to_owned(),
                "escalation" => critical_escalation_reply(),
                "needs" => needs_reply(&["quotedPrice"], &[]),
                "orchestrator" => decision_reply("ACCEPT"),
                other => panic!("unexpected call: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with(
            "Unfortunately, this product has been discontinued.",
            "Accept if price <= $5",
            "Product discontinued",
        ))
        .await;

    assert_eq!(decision.action, AgentAction::Escalate);
    let ResponseArtifact::Escalation { reason } = &decision.response else {
        panic!("expected escalation, got {:?}", decision.response);
    };
    assert!(reason.contains("critical"), "reason carries the severity");

    let escalation = decision
        .expert_opinions
        .iter()
        .find_map(|o| match &o.analysis {
            ExpertAnalysis::Escalation { assessment, .. } => Some(assessment),
            _ => None,
        })
        .expect("escalation opinion present");
    assert_eq!(escalation.severity, Severity::Critical);
    assert!(escalation.should_escalate);
}

#[tokio::test]
async fn missing_lead_time_clarifies_with_ranked_questions() {
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                "extraction" => extraction_reply(4.5, None, None),
                "escalation" => no_escalation_reply(),
                "needs" => needs_reply(
                    &["leadTimeMinDays", "paymentTerms"],
                    &[
                        "What is the lead time for 500 units?",
                        "What payment terms do you offer?",
                    ],
                ),
                "orchestrator" => decision_reply("CLARIFY"),
                "clarify" => {
                    "Hi! Could you share the lead time for 500 units, and your payment terms?"
                        .to_owned()
                }
                other => panic!("unexpected call: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with(
            "We can do $4.50/unit.",
            "Accept only if lead time <= 30 days",
            "",
        ))
        .await;

    assert_eq!(decision.action, AgentAction::Clarify);
    let ResponseArtifact::Clarification { email } = &decision.response else {
        panic!("expected clarification, got {:?}", decision.response);
    };
    assert!(email.contains("lead time"));

    // The drafting prompt lists the needs expert's questions in rank order.
    let clarify_prompts = provider.user_messages_for("clarify");
    assert_eq!(clarify_prompts.len(), 1);
    let first = clarify_prompts[0]
        .find("1. What is the lead time")
        .expect("lead time question listed first");
    let second = clarify_prompts[0]
        .find("2. What payment terms")
        .expect("payment terms question second");
    assert!(first < second);
}

#[tokio::test]
async fn primary_down_fallback_rescues_the_run() {
    let primary = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|_| Err("connection refused".to_owned())),
    ));
    let fallback = Arc::new(ScriptedProvider::new(
        "fallback",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                "extraction" => extraction_reply(4.5, Some(500), Some((25, 30))),
                "escalation" => no_escalation_reply(),
                "needs" => needs_reply(&[], &[]),
                "orchestrator" => decision_reply("ACCEPT"),
                other => panic!("unexpected call: {other}"),
            })
        }),
    ));

    let max_retries = 2;
    let service = LlmService::new(
        Arc::clone(&primary) as Arc<dyn LlmProvider>,
        Some(Arc::clone(&fallback) as Arc<dyn LlmProvider>),
        RetryConfig {
            max_retries_per_provider: max_retries,
            retry_delay: Duration::ZERO,
        },
    );
    let pipeline = NegotiationPipeline::new(Arc::new(service), PipelineOptions::default());

    let decision = pipeline
        .process(&request_with(
            "$4.50/unit, MOQ 500",
            "Accept if price <= $5",
            "Product discontinued",
        ))
        .await;

    assert_eq!(decision.action, AgentAction::Accept, "fallback produced a valid decision");

    // Every invocation: max_retries failures on primary, one fallback success.
    let per_invocation = usize::try_from(max_retries).expect("fits").saturating_add(1);
    let invocations = usize::try_from(decision.total_llm_calls).expect("fits");
    assert_eq!(
        decision.attempts.len(),
        invocations.saturating_mul(per_invocation)
    );
    for chunk in decision.attempts.chunks(per_invocation) {
        let (last, failures) = chunk.split_last().expect("non-empty chunk");
        assert!(failures.iter().all(|a| a.provider == "primary" && !a.success));
        assert_eq!(last.provider, "fallback");
        assert!(last.success);
    }

    // Opinions report the provider that actually served them.
    for opinion in &decision.expert_opinions {
        assert_eq!(opinion.provider, "fallback");
    }
}

#[tokio::test]
async fn total_provider_failure_degrades_to_escalation() {
    // Documented contract: process never fails -- every LLM call failing
    // yields a fail-safe escalate decision carrying the diagnostic.
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|_| Err("boom".to_owned())),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with(
            "$4.50/unit",
            "Accept if price <= $5",
            "Product discontinued",
        ))
        .await;

    assert_eq!(decision.action, AgentAction::Escalate);
    let ResponseArtifact::Escalation { reason } = &decision.response else {
        panic!("expected escalation, got {:?}", decision.response);
    };
    assert!(
        reason.contains("escalation") || reason.contains("failed"),
        "reason should carry a diagnostic: {reason}"
    );

    // Accounting still present: 4 invocations (3 experts + synthesis), all
    // failed, zero token totals, full attempt log.
    assert_eq!(decision.total_llm_calls, 4);
    assert_eq!(decision.total_input_tokens, 0);
    assert_eq!(decision.total_output_tokens, 0);
    assert_eq!(decision.attempts.len(), 4);
    assert!(decision.attempts.iter().all(|a| !a.success));

    // The extraction opinion encodes its failure instead of vanishing.
    let extraction = decision
        .expert_opinions
        .iter()
        .find(|o| o.expert_name == "extraction")
        .expect("extraction opinion present");
    assert!(matches!(
        &extraction.analysis,
        ExpertAnalysis::Extraction { success: false, error: Some(_), .. }
    ));
}

// ---------------------------------------------------------------------------
// Orchestrator behaviors through the facade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_triggers_short_circuit_the_escalation_expert() {
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                "extraction" => extraction_reply(4.5, Some(500), Some((25, 30))),
                "needs" => needs_reply(&[], &[]),
                "orchestrator" => decision_reply("ACCEPT"),
                other => panic!("escalation must not be called: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with("$4.50/unit", "Accept if price <= $5", "   "))
        .await;

    assert!(
        !provider.seen_roles().iter().any(|r| r == "escalation"),
        "whitespace triggers must make zero escalation LLM calls"
    );
    assert_eq!(decision.total_llm_calls, 3, "only extraction, needs, synthesis");

    let escalation = decision
        .expert_opinions
        .iter()
        .find_map(|o| match &o.analysis {
            ExpertAnalysis::Escalation { assessment, .. } => Some(assessment),
            _ => None,
        })
        .expect("short-circuit still yields an opinion");
    assert!(!escalation.should_escalate);
    assert_eq!(escalation.reasoning, "No escalation triggers configured");
    assert_eq!(escalation.severity, Severity::Low);
}

#[tokio::test]
async fn followup_reinvokes_only_the_named_expert() {
    let synthesis_round = AtomicUsize::new(0);
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(move |request| {
            Ok(match role_of(&request.system_prompt) {
                "extraction" => extraction_reply(4.5, None, None),
                "escalation" => no_escalation_reply(),
                "needs" => needs_reply(&["paymentTerms"], &["What payment terms do you offer?"]),
                "orchestrator" => {
                    if synthesis_round.fetch_add(1, Ordering::SeqCst) == 0 {
                        format!(
                            "{}\n<request_followup>expert=needs; question=Does NET 30 matter \
                             under these rules?</request_followup>",
                            decision_reply("CLARIFY")
                        )
                    } else {
                        decision_reply("CLARIFY")
                    }
                }
                "clarify" => "Could you confirm your payment terms?".to_owned(),
                other => panic!("unexpected call: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with(
            "$4.50/unit",
            "Require NET 30 payment terms",
            "",
        ))
        .await;

    assert_eq!(decision.action, AgentAction::Clarify);
    assert_eq!(decision.orchestrator_trace.total_iterations, 2);
    assert_eq!(
        decision.orchestrator_trace.iterations[0]
            .followup
            .as_ref()
            .map(|f| f.expert),
        Some(haggle::types::ExpertKind::Needs)
    );

    let roles = provider.seen_roles();
    let needs_calls = roles.iter().filter(|r| *r == "needs").count();
    let extraction_calls = roles.iter().filter(|r| *r == "extraction").count();
    assert_eq!(needs_calls, 2, "needs expert re-invoked once");
    assert_eq!(extraction_calls, 1, "other experts not re-invoked");

    // The re-invocation carried the orchestrator's question through.
    let needs_prompts = provider.user_messages_for("needs");
    assert!(needs_prompts[1].contains("Does NET 30 matter"));
    assert!(
        !needs_prompts[0].contains("Does NET 30 matter"),
        "first pass has no follow-up question"
    );
}

#[tokio::test]
async fn followup_past_budget_is_ignored() {
    // Every synthesis asks for a follow-up; the cap (2) must hold and the
    // final response must still decide.
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                "extraction" => extraction_reply(4.5, Some(500), None),
                "escalation" => no_escalation_reply(),
                "needs" => needs_reply(&[], &[]),
                "orchestrator" => format!(
                    "{}\n<request_followup>expert=extraction; question=look again</request_followup>",
                    decision_reply("ACCEPT")
                ),
                other => panic!("unexpected call: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with("$4.50/unit", "Accept if price <= $5", ""))
        .await;

    assert_eq!(decision.orchestrator_trace.total_iterations, 2, "hard cap");
    assert_eq!(decision.action, AgentAction::Accept);

    let roles = provider.seen_roles();
    let synthesis_calls = roles.iter().filter(|r| *r == "orchestrator").count();
    assert_eq!(synthesis_calls, 2);
    let extraction_calls = roles.iter().filter(|r| *r == "extraction").count();
    assert_eq!(extraction_calls, 2, "one fan-out + one follow-up, then stop");
}

#[tokio::test]
async fn drafting_failure_degrades_to_escalation() {
    // Counter decided, but the drafting call fails: the decision must
    // degrade to escalation rather than erroring out.
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| match role_of(&request.system_prompt) {
            "extraction" => Ok(extraction_reply(6.0, None, None)),
            "escalation" => Ok(no_escalation_reply()),
            "needs" => Ok(needs_reply(&[], &[])),
            "orchestrator" => Ok(decision_reply("COUNTER")),
            "counter" => Err("model unavailable".to_owned()),
            other => panic!("unexpected call: {other}"),
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let decision = pipeline
        .process(&request_with("$6.00/unit", "Counter if price > $5", ""))
        .await;

    assert_eq!(decision.action, AgentAction::Escalate, "artifact is authoritative");
    let ResponseArtifact::Escalation { reason } = &decision.response else {
        panic!("expected escalation, got {:?}", decision.response);
    };
    assert!(reason.contains("drafting failed"));
    assert!(
        decision.attempts.iter().any(|a| !a.success),
        "failed drafting attempt stays in the audit log"
    );
}

// ---------------------------------------------------------------------------
// Merge across turns and initial outreach
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prior_data_merges_with_turn_extraction() {
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                // This turn only yields lead time.
                "extraction" => {
                    r#"{"leadTimeMinDays": 25, "leadTimeMaxDays": 30, "confidence": 0.9}"#
                        .to_owned()
                }
                "escalation" => no_escalation_reply(),
                "needs" => needs_reply(&[], &[]),
                "orchestrator" => decision_reply("ACCEPT"),
                other => panic!("unexpected call: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let mut request = request_with("Lead time is 25-30 days.", "Accept anytime", "");
    request.prior_extracted_data = Some(haggle::types::ExtractedQuoteData {
        quoted_price: Some(4.5),
        quoted_price_currency: Some("USD".to_owned()),
        moq: Some(500),
        ..haggle::types::ExtractedQuoteData::default()
    });

    let decision = pipeline.process(&request).await;

    let merged = decision.extracted_data.expect("merged data present");
    assert_eq!(merged.quoted_price, Some(4.5), "prior price survives");
    assert_eq!(merged.moq, Some(500));
    assert_eq!(merged.lead_time_min_days, Some(25), "new field merged in");

    // The extraction prompt embedded the prior data for refinement.
    let extraction_prompts = provider.user_messages_for("extraction");
    assert!(extraction_prompts[0].contains("Previously Extracted Data"));
    assert!(extraction_prompts[0].contains("\"quotedPrice\": 4.5"));
}

#[tokio::test]
async fn initial_email_is_a_single_call() {
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|request| {
            Ok(match role_of(&request.system_prompt) {
                "outreach" => serde_json::json!({
                    "subjectLine": "Quote request: Widget A (500 units)",
                    "emailText": "Hello, we would like a quote for 500 units of Widget A."
                })
                .to_string(),
                other => panic!("outreach must be the only call: {other}"),
            })
        }),
    ));
    let pipeline = pipeline_over(Arc::clone(&provider));

    let email = pipeline
        .generate_initial_email(&standard_order())
        .await
        .expect("should draft");

    assert_eq!(email.subject_line, "Quote request: Widget A (500 units)");
    assert!(email.email_text.contains("500 units"));
    assert_eq!(email.provider, "primary");
    assert_eq!(provider.seen_roles(), vec!["outreach".to_owned()]);
}

#[tokio::test]
async fn initial_email_total_failure_is_an_error() {
    let provider = Arc::new(ScriptedProvider::new(
        "primary",
        Box::new(|_| Err("down".to_owned())),
    ));
    let pipeline = pipeline_over(provider);

    let result = pipeline.generate_initial_email(&standard_order()).await;
    assert!(result.is_err(), "no fail-safe artifact exists for outreach");
}
