//! Specialist LLM analyses ("experts").
//!
//! Each expert runs one purpose-built prompt against the shared
//! [`LlmService`](crate::llm::LlmService) and returns an [`ExpertReport`]:
//! a typed [`ExpertOpinion`] plus the provider attempt log for accounting.
//!
//! Experts never fail the pipeline. A failed LLM call is encoded inside
//! the opinion (`success`/`error` fields, or the escalation expert's
//! fail-closed default) and the report is returned normally.

use std::sync::Arc;

use crate::llm::{LlmService, ServiceCall};
use crate::types::{AttemptRecord, ExpertAnalysis, ExpertOpinion};

pub mod escalation;
pub mod extraction;
pub mod needs;

pub use escalation::EscalationExpert;
pub use extraction::ExtractionExpert;
pub use needs::NeedsExpert;

/// An expert's opinion together with the attempt log that produced it.
#[derive(Debug, Clone)]
pub struct ExpertReport {
    /// The typed opinion, including LLM accounting.
    pub opinion: ExpertOpinion,
    /// Every provider attempt made for this opinion (empty when the expert
    /// short-circuited without an LLM call).
    pub attempts: Vec<AttemptRecord>,
}

/// Optional per-expert max-token caps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpertTokenCaps {
    /// Cap for the extraction expert.
    pub extraction: Option<u32>,
    /// Cap for the escalation expert.
    pub escalation: Option<u32>,
    /// Cap for the needs expert.
    pub needs: Option<u32>,
}

/// The three fan-out experts, instantiated once and shared by reference.
///
/// The pipeline facade owns one set; the orchestrator only borrows it, so
/// there is no coupling cycle between orchestrator and experts.
pub struct ExpertSet {
    /// Quote-field extraction.
    pub extraction: ExtractionExpert,
    /// Escalation trigger evaluation.
    pub escalation: EscalationExpert,
    /// Missing-field / question ranking.
    pub needs: NeedsExpert,
}

impl ExpertSet {
    /// Instantiate all three experts over one shared service.
    pub fn new(service: &Arc<LlmService>, caps: ExpertTokenCaps) -> Self {
        Self {
            extraction: ExtractionExpert::new(Arc::clone(service), caps.extraction),
            escalation: EscalationExpert::new(Arc::clone(service), caps.escalation),
            needs: NeedsExpert::new(Arc::clone(service), caps.needs),
        }
    }
}

/// Build an opinion from a successful service call.
pub(crate) fn opinion_from_call(
    expert_name: &str,
    call: &ServiceCall,
    analysis: ExpertAnalysis,
) -> ExpertOpinion {
    ExpertOpinion {
        expert_name: expert_name.to_owned(),
        provider: call.response.provider.clone(),
        model: call.response.model.clone(),
        input_tokens: call.response.input_tokens,
        output_tokens: call.response.output_tokens,
        latency_ms: call.response.latency_ms,
        analysis,
    }
}

/// Build an opinion for a call that never succeeded (or never happened).
/// Usage is zeroed; provider/model reflect the configured primary.
pub(crate) fn opinion_without_call(
    expert_name: &str,
    service: &LlmService,
    analysis: ExpertAnalysis,
) -> ExpertOpinion {
    ExpertOpinion {
        expert_name: expert_name.to_owned(),
        provider: service.primary_name().to_owned(),
        model: service.primary_model().to_owned(),
        input_tokens: 0,
        output_tokens: 0,
        latency_ms: 0,
        analysis,
    }
}
