//! Core types shared across the negotiation pipeline.
//!
//! Everything the pipeline passes between components lives here: the
//! conversation message log, the cumulative quote extraction, expert
//! opinions with their LLM accounting, and the final [`AgentDecision`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The negotiation agent (us).
    Agent,
    /// The supplier counterparty.
    Supplier,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => f.write_str("AGENT"),
            Self::Supplier => f.write_str("SUPPLIER"),
        }
    }
}

/// A single message in a negotiation thread. Append-only; ordering is
/// insertion order and timestamps are informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The author of the message.
    pub role: MessageRole,
    /// Message body text.
    pub text: String,
    /// When the message was recorded.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Extracted quote data
// ---------------------------------------------------------------------------

/// Structured quote fields pulled from supplier messages.
///
/// All fields are optional: a single supplier message rarely carries a
/// complete quote, so per-turn extractions are [`merged`](Self::merge) into
/// a cumulative record that converges over a thread.
///
/// Serialized in camelCase -- the same shape the extraction model is asked
/// to emit, so prior data can be embedded verbatim in follow-up prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedQuoteData {
    /// Unit price as quoted, in `quoted_price_currency`.
    pub quoted_price: Option<f64>,
    /// ISO-4217 currency code, uppercase (`RMB` is normalized to `CNY`).
    pub quoted_price_currency: Option<String>,
    /// Unit price converted to USD, when derivable.
    pub quoted_price_usd: Option<f64>,
    /// Quantity the supplier can deliver.
    pub available_quantity: Option<u32>,
    /// Minimum order quantity.
    pub moq: Option<u32>,
    /// Lead time lower bound, in days.
    pub lead_time_min_days: Option<u32>,
    /// Lead time upper bound, in days. Invariant: `min <= max` when both set.
    pub lead_time_max_days: Option<u32>,
    /// Payment terms as stated (e.g. "NET 30").
    pub payment_terms: Option<String>,
    /// How long the quote remains valid.
    pub validity_period: Option<String>,
    /// Verbatim model payload the fields were extracted from, kept for audit.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub raw_extraction_json: serde_json::Value,
}

impl ExtractedQuoteData {
    /// Merge a newer extraction into this one.
    ///
    /// Field-wise: a newer `Some` overwrites; `None` never erases an earlier
    /// value. The raw payload is replaced whenever the newer one is non-null.
    pub fn merge(&mut self, newer: &ExtractedQuoteData) {
        merge_field(&mut self.quoted_price, &newer.quoted_price);
        merge_field(&mut self.quoted_price_currency, &newer.quoted_price_currency);
        merge_field(&mut self.quoted_price_usd, &newer.quoted_price_usd);
        merge_field(&mut self.available_quantity, &newer.available_quantity);
        merge_field(&mut self.moq, &newer.moq);
        merge_field(&mut self.lead_time_min_days, &newer.lead_time_min_days);
        merge_field(&mut self.lead_time_max_days, &newer.lead_time_max_days);
        merge_field(&mut self.payment_terms, &newer.payment_terms);
        merge_field(&mut self.validity_period, &newer.validity_period);
        if !newer.raw_extraction_json.is_null() {
            self.raw_extraction_json = newer.raw_extraction_json.clone();
        }
    }

    /// Returns true when no quote field has been extracted yet.
    ///
    /// The currency field is not counted: the parser fills it with `"USD"`
    /// even when the message carried no quote, and a currency without a
    /// price says nothing on its own.
    pub fn is_empty(&self) -> bool {
        self.quoted_price.is_none()
            && self.quoted_price_usd.is_none()
            && self.available_quantity.is_none()
            && self.moq.is_none()
            && self.lead_time_min_days.is_none()
            && self.lead_time_max_days.is_none()
            && self.payment_terms.is_none()
            && self.validity_period.is_none()
    }
}

fn merge_field<T: Clone>(current: &mut Option<T>, newer: &Option<T>) {
    if let Some(value) = newer {
        *current = Some(value.clone());
    }
}

// ---------------------------------------------------------------------------
// Order context
// ---------------------------------------------------------------------------

/// How the agent opens a negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStyle {
    /// Ask the supplier for a quote without revealing a target price.
    AskForQuote,
    /// State the target price upfront and ask for confirmation.
    StatePriceUpfront,
}

/// Merchant-side order facts, immutable for the duration of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderContext {
    /// Product name as the merchant knows it.
    pub sku_name: String,
    /// Supplier-side SKU or product reference.
    pub supplier_sku: String,
    /// Quantity the merchant wants, free-form (e.g. "500 units").
    pub quantity_requested: Option<String>,
    /// Last price paid for this SKU, in USD.
    pub last_known_price: Option<f64>,
    /// Opening style for initial outreach.
    pub negotiation_style: Option<NegotiationStyle>,
}

// ---------------------------------------------------------------------------
// Expert opinions
// ---------------------------------------------------------------------------

/// Escalation severity, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; no urgency.
    Low,
    /// Worth a look, negotiation may continue.
    Medium,
    /// A human should review before the agent proceeds.
    High,
    /// Stop immediately and involve a human.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// The escalation expert's verdict on merchant-defined triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationAssessment {
    /// Whether a human must take over.
    pub should_escalate: bool,
    /// Why the expert reached this verdict.
    pub reasoning: String,
    /// Every trigger the expert considered.
    pub triggers_evaluated: Vec<String>,
    /// The subset of triggers that actually fired.
    pub triggered_triggers: Vec<String>,
    /// How urgent the escalation is.
    pub severity: Severity,
}

/// The needs expert's view of what is still missing from the quote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedsAssessment {
    /// Quote fields still unknown, most important first.
    pub missing_fields: Vec<String>,
    /// Follow-up questions to ask the supplier, ranked by the active rules.
    pub prioritized_questions: Vec<String>,
    /// Why the expert ranked things this way.
    pub reasoning: String,
}

/// Typed payload of a single expert's analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpertAnalysis {
    /// Output of the extraction expert.
    Extraction {
        /// Whether the extraction call and parse succeeded.
        success: bool,
        /// Model-reported confidence, clamped to `[0, 1]`.
        confidence: f64,
        /// The extracted fields, when successful.
        extracted_data: Option<ExtractedQuoteData>,
        /// Free-form caveats from the model or the parser.
        notes: Vec<String>,
        /// Failure description when `success` is false.
        error: Option<String>,
    },
    /// Output of the escalation expert.
    Escalation {
        /// The trigger verdict. On LLM failure this is the fail-closed
        /// default (escalate, severity high).
        assessment: EscalationAssessment,
        /// Failure description when the underlying call failed.
        error: Option<String>,
    },
    /// Output of the needs expert.
    Needs {
        /// Missing fields and ranked questions.
        assessment: NeedsAssessment,
        /// Failure description when the underlying call failed.
        error: Option<String>,
    },
}

/// A single expert's opinion, including LLM accounting for the call that
/// produced it. Failed calls still yield an opinion with zeroed usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertOpinion {
    /// Stable expert identifier ("extraction", "escalation", "needs").
    pub expert_name: String,
    /// Provider that served the call (primary or fallback).
    pub provider: String,
    /// Model that served the call.
    pub model: String,
    /// Prompt tokens consumed by the successful attempt.
    pub input_tokens: u64,
    /// Completion tokens generated by the successful attempt.
    pub output_tokens: u64,
    /// Wall-clock latency of the successful attempt, in milliseconds.
    pub latency_ms: u64,
    /// The typed analysis payload.
    pub analysis: ExpertAnalysis,
}

/// Identifies one of the three fan-out experts for follow-up dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertKind {
    /// Quote-field extraction.
    Extraction,
    /// Escalation trigger evaluation.
    Escalation,
    /// Missing-field / question ranking.
    Needs,
}

impl ExpertKind {
    /// Stable identifier used in opinions, prompts, and follow-up blocks.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Escalation => "escalation",
            Self::Needs => "needs",
        }
    }
}

impl std::str::FromStr for ExpertKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "extraction" => Ok(Self::Extraction),
            "escalation" => Ok(Self::Escalation),
            "needs" => Ok(Self::Needs),
            other => Err(anyhow::anyhow!("unknown expert: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// The agent's final action for one supplier message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentAction {
    /// The quote satisfies the rules; propose approval to the merchant.
    Accept,
    /// Push back with a counter-offer email.
    Counter,
    /// Ask the supplier for missing information.
    Clarify,
    /// Hand the thread to a human.
    Escalate,
}

impl std::fmt::Display for AgentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::Counter => f.write_str("counter"),
            Self::Clarify => f.write_str("clarify"),
            Self::Escalate => f.write_str("escalate"),
        }
    }
}

/// A structured purchase approval proposed to the merchant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedApproval {
    /// Units to order.
    pub quantity: u32,
    /// Unit price in the quoted currency.
    pub price: f64,
    /// `quantity * price`.
    pub total: f64,
    /// One-line summary for the approval UI.
    pub summary: String,
}

/// A counter-offer drafted for the supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterOffer {
    /// Full reply email body.
    pub draft_email: String,
    /// Short summary of the terms we are proposing.
    pub proposed_terms: String,
}

/// Exactly one concrete artifact materializing the decided action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseArtifact {
    /// Accept: a structured approval for the merchant.
    Approval(ProposedApproval),
    /// Counter: a drafted reply pushing for better terms.
    Counter(CounterOffer),
    /// Clarify: a drafted reply asking the prioritized questions.
    Clarification {
        /// Full reply email body.
        email: String,
    },
    /// Escalate: reasoning handed to the human reviewer.
    Escalation {
        /// Why the thread needs a human.
        reason: String,
    },
}

/// A follow-up request the orchestrator model may emit to re-consult one
/// expert before deciding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowupRequest {
    /// Which expert to re-invoke.
    pub expert: ExpertKind,
    /// The question to pass through as additional context.
    pub question: String,
}

/// What happened in one orchestrator iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationTrace {
    /// 1-indexed iteration number.
    pub iteration: u32,
    /// The model's `<systematic_evaluation>` block, when present.
    pub evaluation: Option<String>,
    /// The action parsed from this iteration's `<decision>` block.
    pub action: Option<AgentAction>,
    /// Follow-up requested by this iteration, when any.
    pub followup: Option<FollowupRequest>,
}

/// Audit trail of the orchestrator loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorTrace {
    /// Per-iteration records, in order.
    pub iterations: Vec<IterationTrace>,
    /// Number of synthesis iterations that ran.
    pub total_iterations: u32,
}

/// One provider invocation inside a logical LLM call, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Provider name.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Wall-clock latency of this attempt, in milliseconds.
    pub latency_ms: u64,
    /// Whether the attempt returned a response.
    pub success: bool,
    /// Error description for failed attempts.
    pub error: Option<String>,
}

/// The pipeline's structured output for one supplier message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    /// Unique identifier for this decision.
    pub decision_id: Uuid,
    /// The action the agent decided on.
    pub action: AgentAction,
    /// The orchestrator's reasoning for the action.
    pub reasoning: String,
    /// Merged quote data after this turn's extraction, when available.
    pub extracted_data: Option<ExtractedQuoteData>,
    /// Final set of expert opinions, in declared order.
    pub expert_opinions: Vec<ExpertOpinion>,
    /// Audit trail of the orchestrator loop.
    pub orchestrator_trace: OrchestratorTrace,
    /// The concrete artifact for the decided action.
    pub response: ResponseArtifact,
    /// Number of logical LLM invocations (not attempts) in this run.
    pub total_llm_calls: u64,
    /// Prompt tokens across the successful attempt of each invocation.
    pub total_input_tokens: u64,
    /// Completion tokens across the successful attempt of each invocation.
    pub total_output_tokens: u64,
    /// Latency summed across the successful attempt of each invocation.
    pub total_latency_ms: u64,
    /// Every provider attempt made during the run, failures included.
    pub attempts: Vec<AttemptRecord>,
}

/// First-outreach email produced without running the expert pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialEmail {
    /// Email subject line.
    pub subject_line: String,
    /// Email body.
    pub email_text: String,
    /// Provider that served the call.
    pub provider: String,
    /// Model that served the call.
    pub model: String,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens generated.
    pub output_tokens: u64,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(price: Option<f64>, moq: Option<u32>) -> ExtractedQuoteData {
        ExtractedQuoteData {
            quoted_price: price,
            moq,
            ..ExtractedQuoteData::default()
        }
    }

    #[test]
    fn test_merge_some_overwrites() {
        let mut base = quote(Some(4.5), Some(500));
        base.merge(&quote(Some(4.2), None));
        assert_eq!(base.quoted_price, Some(4.2));
        assert_eq!(base.moq, Some(500), "None must not erase an earlier value");
    }

    #[test]
    fn test_merge_is_monotonic_on_non_null_fields() {
        let mut base = ExtractedQuoteData::default();
        base.merge(&quote(Some(6.0), None));
        base.merge(&ExtractedQuoteData::default());
        base.merge(&quote(None, Some(100)));
        assert!(
            base.quoted_price.is_some(),
            "a field once set must stay set across merges"
        );
        assert_eq!(base.moq, Some(100));
    }

    #[test]
    fn test_merge_replaces_raw_json_when_non_null() {
        let mut base = ExtractedQuoteData {
            raw_extraction_json: serde_json::json!({"v": 1}),
            ..ExtractedQuoteData::default()
        };
        base.merge(&ExtractedQuoteData::default());
        assert_eq!(base.raw_extraction_json["v"], 1, "null raw must not replace");

        base.merge(&ExtractedQuoteData {
            raw_extraction_json: serde_json::json!({"v": 2}),
            ..ExtractedQuoteData::default()
        });
        assert_eq!(base.raw_extraction_json["v"], 2);
    }

    #[test]
    fn test_is_empty() {
        assert!(ExtractedQuoteData::default().is_empty());
        assert!(!quote(Some(1.0), None).is_empty());

        let currency_only = ExtractedQuoteData {
            quoted_price_currency: Some("USD".to_owned()),
            ..ExtractedQuoteData::default()
        };
        assert!(currency_only.is_empty(), "defaulted currency alone is not data");
    }

    #[test]
    fn test_quote_data_camel_case_round_trip() {
        let data = ExtractedQuoteData {
            quoted_price: Some(4.5),
            quoted_price_currency: Some("USD".to_owned()),
            lead_time_min_days: Some(25),
            lead_time_max_days: Some(30),
            ..ExtractedQuoteData::default()
        };
        let json = serde_json::to_value(&data).expect("should serialize");
        assert_eq!(json["quotedPrice"], 4.5);
        assert_eq!(json["leadTimeMinDays"], 25);

        let back: ExtractedQuoteData = serde_json::from_value(json).expect("should deserialize");
        assert_eq!(back, data);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert!(Severity::High >= Severity::High);
    }

    #[test]
    fn test_expert_analysis_tagging() {
        let analysis = ExpertAnalysis::Needs {
            assessment: NeedsAssessment {
                missing_fields: vec!["leadTime".to_owned()],
                prioritized_questions: vec![],
                reasoning: "lead time unknown".to_owned(),
            },
            error: None,
        };
        let json = serde_json::to_value(&analysis).expect("should serialize");
        assert_eq!(json["type"], "needs");
        assert_eq!(json["assessment"]["missingFields"][0], "leadTime");
    }

    #[test]
    fn test_expert_kind_round_trip() {
        for kind in [ExpertKind::Extraction, ExpertKind::Escalation, ExpertKind::Needs] {
            let parsed: ExpertKind = kind.as_str().parse().expect("should parse");
            assert_eq!(parsed, kind);
        }
        assert!("planner".parse::<ExpertKind>().is_err());
    }

    #[test]
    fn test_action_display() {
        assert_eq!(AgentAction::Accept.to_string(), "accept");
        assert_eq!(AgentAction::Escalate.to_string(), "escalate");
    }

    #[test]
    fn test_response_artifact_tagging() {
        let artifact = ResponseArtifact::Escalation {
            reason: "discontinued".to_owned(),
        };
        let json = serde_json::to_value(&artifact).expect("should serialize");
        assert_eq!(json["type"], "escalation");
        assert_eq!(json["reason"], "discontinued");
    }
}
