//! Tolerant parsing of LLM output.
//!
//! Models are asked for JSON, but what comes back may be bare JSON, JSON in
//! a markdown fence, or JSON buried in prose. [`parse_json_object`] scans
//! for the first balanced `{...}` (string-literal aware) and parses that
//! slice, which covers all three shapes deterministically.
//!
//! [`parse_extraction`] layers quote-field validation and normalization on
//! top: numeric-string coercion, currency defaulting and `RMB → CNY`
//! mapping, confidence clamping, and lead-time bound ordering.
//!
//! The orchestrator's output contract is XML-ish instead: [`extract_xml_tag`],
//! [`parse_decision`], and [`parse_followup`] read it.

use regex::Regex;
use serde_json::Value;

use crate::types::{AgentAction, ExpertKind, ExtractedQuoteData, FollowupRequest};

/// Errors produced when model output cannot be read.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// No balanced JSON object could be located in the text.
    #[error("no JSON object found in model output")]
    NoJsonObject,
    /// A candidate slice was found but is not valid JSON.
    #[error("invalid JSON in model output: {0}")]
    InvalidJson(String),
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Locate the first balanced JSON object in `text`.
///
/// Scans from the first `{` and counts braces, skipping brace characters
/// inside string literals (escape-aware). Returns the exact slice.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text.get(start..)?.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth = depth.saturating_add(1),
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start.saturating_add(offset).saturating_add(c.len_utf8());
                    return text.get(start..end);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extract and parse the first JSON object embedded in `text`.
///
/// Accepts bare JSON, fenced ```` ```json ```` blocks, and JSON surrounded
/// by prose.
///
/// # Errors
///
/// Returns [`ParseError`] when no balanced object exists or the slice is
/// not valid JSON.
pub fn parse_json_object(text: &str) -> Result<Value, ParseError> {
    let slice = extract_json_object(text).ok_or(ParseError::NoJsonObject)?;
    serde_json::from_str(slice).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

// ---------------------------------------------------------------------------
// Extraction validation / normalization
// ---------------------------------------------------------------------------

/// Result of parsing one extraction-model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionParse {
    /// Whether a valid extraction was recovered.
    pub success: bool,
    /// The normalized quote fields, when successful.
    pub data: Option<ExtractedQuoteData>,
    /// Model confidence, clamped to `[0, 1]`. Zero on failure.
    pub confidence: f64,
    /// Caveats from the model plus normalization notes.
    pub notes: Vec<String>,
    /// Failure description when `success` is false.
    pub error: Option<String>,
}

impl ExtractionParse {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            confidence: 0.0,
            notes: Vec::new(),
            error: Some(error),
        }
    }
}

/// Parse and normalize an extraction-model response.
///
/// Field names are read in camelCase (the model-facing contract) with
/// snake_case fallbacks. Normalization applied:
/// - numeric strings coerce to numbers,
/// - missing currency defaults to `"USD"`,
/// - currency is uppercased and `RMB` maps to `CNY`,
/// - `quoted_price_usd` is derived when the currency already is USD,
/// - confidence is clamped to `[0, 1]`,
/// - reversed lead-time bounds are swapped (with a note).
pub fn parse_extraction(raw: &str) -> ExtractionParse {
    let value = match parse_json_object(raw) {
        Ok(v) => v,
        Err(e) => return ExtractionParse::failure(e.to_string()),
    };

    let mut notes: Vec<String> = Vec::new();
    if let Some(model_notes) = field(&value, "notes").and_then(Value::as_array) {
        notes.extend(
            model_notes
                .iter()
                .filter_map(Value::as_str)
                .map(ToOwned::to_owned),
        );
    }

    let quoted_price = number_field(&value, "quotedPrice");
    let currency = string_field(&value, "quotedPriceCurrency")
        .map(normalize_currency)
        .unwrap_or_else(|| "USD".to_owned());

    let quoted_price_usd = match number_field(&value, "quotedPriceUsd") {
        Some(usd) => Some(usd),
        None if currency == "USD" => quoted_price,
        None => None,
    };

    let mut lead_min = count_field(&value, "leadTimeMinDays");
    let mut lead_max = count_field(&value, "leadTimeMaxDays");
    if let (Some(min), Some(max)) = (lead_min, lead_max) {
        if min > max {
            notes.push(format!("lead time bounds reversed ({min} > {max}), swapped"));
            lead_min = Some(max);
            lead_max = Some(min);
        }
    }

    let confidence = clamp_confidence(number_field(&value, "confidence").unwrap_or(0.0));

    let data = ExtractedQuoteData {
        quoted_price,
        quoted_price_currency: Some(currency),
        quoted_price_usd,
        available_quantity: count_field(&value, "availableQuantity"),
        moq: count_field(&value, "moq"),
        lead_time_min_days: lead_min,
        lead_time_max_days: lead_max,
        payment_terms: string_field(&value, "paymentTerms"),
        validity_period: string_field(&value, "validityPeriod"),
        raw_extraction_json: value,
    };

    ExtractionParse {
        success: true,
        data: Some(data),
        confidence,
        notes,
        error: None,
    }
}

/// Look a field up in camelCase, falling back to snake_case.
fn field<'a>(value: &'a Value, camel: &str) -> Option<&'a Value> {
    if let Some(v) = value.get(camel) {
        if !v.is_null() {
            return Some(v);
        }
    }
    let snake = camel_to_snake(camel);
    value.get(snake).filter(|v| !v.is_null())
}

fn camel_to_snake(camel: &str) -> String {
    let mut out = String::with_capacity(camel.len());
    for c in camel.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Read a number, coercing numeric strings (`"4.50"` → `4.5`).
fn number_field(value: &Value, name: &str) -> Option<f64> {
    match field(value, name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    }
}

/// Read a non-negative integer count, coercing numeric strings.
fn count_field(value: &Value, name: &str) -> Option<u32> {
    match field(value, name)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn string_field(value: &Value, name: &str) -> Option<String> {
    field(value, name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Uppercase and apply the `RMB → CNY` alias.
fn normalize_currency(raw: String) -> String {
    let upper = raw.trim().to_uppercase();
    if upper == "RMB" {
        "CNY".to_owned()
    } else {
        upper
    }
}

/// Clamp a confidence value into `[0, 1]`; non-finite input becomes 0.
fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Orchestrator output
// ---------------------------------------------------------------------------

/// Return the trimmed content of the first `<tag>…</tag>` pair.
///
/// Matching is non-greedy and spans newlines.
pub fn extract_xml_tag(text: &str, tag: &str) -> Option<String> {
    let pattern = format!("(?s)<{tag}>(.*?)</{tag}>");
    let regex = Regex::new(&pattern).ok()?;
    regex
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().trim().to_owned())
}

/// Parse the overall action from a synthesis response.
///
/// Reads the first line matching `Overall Action: ACCEPT|COUNTER|CLARIFY|ESCALATE`
/// (case-insensitive). Any ambiguity defaults to [`AgentAction::Escalate`] --
/// it is always safe to involve a human.
pub fn parse_decision(text: &str) -> AgentAction {
    let Ok(regex) = Regex::new(r"(?i)Overall Action:\s*(ACCEPT|COUNTER|CLARIFY|ESCALATE)") else {
        return AgentAction::Escalate;
    };
    match regex
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
        .as_deref()
    {
        Some("ACCEPT") => AgentAction::Accept,
        Some("COUNTER") => AgentAction::Counter,
        Some("CLARIFY") => AgentAction::Clarify,
        _ => AgentAction::Escalate,
    }
}

/// Parse a follow-up request from a synthesis response.
///
/// Reads the first `<request_followup>` block only; any further blocks in
/// the same response are ignored. Expected content:
/// `expert=<extraction|escalation|needs>; question=<text>`.
pub fn parse_followup(text: &str) -> Option<FollowupRequest> {
    let block = extract_xml_tag(text, "request_followup")?;
    let (expert_part, question_part) = block.split_once(';')?;

    let expert: ExpertKind = expert_part
        .trim()
        .strip_prefix("expert=")?
        .parse()
        .ok()?;
    let question = question_part.trim().strip_prefix("question=")?.trim();
    if question.is_empty() {
        return None;
    }

    Some(FollowupRequest {
        expert,
        question: question.to_owned(),
    })
}
