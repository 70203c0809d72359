//! Extraction expert -- pulls structured quote fields from one supplier
//! message.
//!
//! The prompt names every target field and the exact JSON shape; the reply
//! goes through [`parse_extraction`] so fenced or prose-wrapped JSON still
//! lands. Prior merged data, when present, is embedded verbatim so the
//! model refines instead of re-deriving.

use std::sync::Arc;

use tracing::debug;

use crate::llm::LlmService;
use crate::parser::parse_extraction;
use crate::providers::LlmRequest;
use crate::types::{ExpertAnalysis, ExpertKind, ExtractedQuoteData};

use super::{opinion_from_call, opinion_without_call, ExpertReport};

/// Extraction role prompt. Lists every field the model may emit and how to
/// report confidence.
const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are a procurement data extraction specialist. Extract structured quote \
data from a supplier's message in a price negotiation.

Extract only what the supplier actually states. Never invent values.

Output a single JSON object with these fields (omit or null anything the \
message does not state):
{
  \"quotedPrice\": number,            // unit price as quoted
  \"quotedPriceCurrency\": string,    // ISO-4217 code, e.g. \"USD\", \"CNY\"
  \"availableQuantity\": integer,     // units the supplier can deliver
  \"moq\": integer,                   // minimum order quantity
  \"leadTimeMinDays\": integer,
  \"leadTimeMaxDays\": integer,       // a single lead time fills both bounds
  \"paymentTerms\": string,           // e.g. \"NET 30\", \"50% deposit\"
  \"validityPeriod\": string,         // how long the quote stands
  \"confidence\": number,             // 0 to 1
  \"notes\": [string]                 // caveats, ambiguities
}

Confidence guide: 0.9+ when the supplier states values explicitly; around \
0.5 when you infer from indirect phrasing; 0.2 or lower when you are \
guessing. If the message contains no quote data at all, return \
{\"confidence\": 0, \"notes\": [\"no quote data present\"]}.

When previously extracted data is provided, treat it as the current state \
of knowledge: re-extract only fields this message updates or contradicts, \
and keep your confidence judgment about this message alone.";

/// Input for one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct ExtractionInput<'a> {
    /// The supplier message to extract from.
    pub supplier_message: &'a str,
    /// Rendered conversation history, when any.
    pub conversation_history: Option<&'a str>,
    /// Cumulative merged data from earlier turns, when non-empty.
    pub prior_extracted_data: Option<&'a ExtractedQuoteData>,
    /// Orchestrator follow-up question, on re-invocation.
    pub additional_question: Option<&'a str>,
}

/// Extraction expert over the shared LLM service.
pub struct ExtractionExpert {
    service: Arc<LlmService>,
    max_tokens: Option<u32>,
}

impl ExtractionExpert {
    /// Create the expert with an optional per-call token cap.
    pub fn new(service: Arc<LlmService>, max_tokens: Option<u32>) -> Self {
        Self {
            service,
            max_tokens,
        }
    }

    /// Run one extraction pass.
    ///
    /// Never fails: an exhausted LLM service yields an opinion with
    /// `success=false` and the error message, plus the attempt log.
    pub async fn analyze(&self, input: &ExtractionInput<'_>) -> ExpertReport {
        let request = LlmRequest::new(EXTRACTION_SYSTEM_PROMPT, compose_user_message(input))
            .with_max_tokens(self.max_tokens);

        match self.service.call(&request).await {
            Ok(call) => {
                let parsed = parse_extraction(&call.response.content);
                debug!(
                    success = parsed.success,
                    confidence = parsed.confidence,
                    "extraction expert finished"
                );
                let analysis = ExpertAnalysis::Extraction {
                    success: parsed.success,
                    confidence: parsed.confidence,
                    extracted_data: parsed.data,
                    notes: parsed.notes,
                    error: parsed.error,
                };
                ExpertReport {
                    opinion: opinion_from_call(ExpertKind::Extraction.as_str(), &call, analysis),
                    attempts: call.attempts,
                }
            }
            Err(e) => {
                let analysis = ExpertAnalysis::Extraction {
                    success: false,
                    confidence: 0.0,
                    extracted_data: None,
                    notes: Vec::new(),
                    error: Some(e.to_string()),
                };
                let attempts = e.attempts().to_vec();
                ExpertReport {
                    opinion: opinion_without_call(
                        ExpertKind::Extraction.as_str(),
                        &self.service,
                        analysis,
                    ),
                    attempts,
                }
            }
        }
    }
}

/// Assemble the user message from the supplier text plus optional context
/// sections.
fn compose_user_message(input: &ExtractionInput<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!("## Supplier Message\n{}", input.supplier_message));

    if let Some(history) = input.conversation_history.filter(|h| !h.is_empty()) {
        sections.push(format!("## Conversation History\n{history}"));
    }

    if let Some(prior) = input.prior_extracted_data.filter(|d| !d.is_empty()) {
        let rendered = serde_json::to_string_pretty(prior)
            .unwrap_or_else(|_| "(unavailable)".to_owned());
        sections.push(format!("## Previously Extracted Data\n{rendered}"));
    }

    if let Some(question) = input.additional_question.filter(|q| !q.is_empty()) {
        sections.push(format!("## Follow-up Question\n{question}"));
    }

    sections.join("\n\n")
}
