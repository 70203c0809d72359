//! Multi-expert LLM agent for supplier price negotiations.
//!
//! The core is a pipeline that turns one supplier message into a structured
//! [`AgentDecision`](types::AgentDecision) -- accept, counter, clarify, or
//! escalate -- with a concrete artifact attached (an approval proposal, a
//! drafted email, or an escalation reason).
//!
//! Flow: three specialist experts (extraction, escalation triggers, needs
//! assessment) analyze the message concurrently; the
//! [`orchestrator`] synthesizes their opinions into an action, optionally
//! re-consulting one expert; the [`response`] generator materializes the
//! action. All LLM traffic goes through the retry/fallback
//! [`llm::LlmService`], and every provider attempt is accounted for on the
//! returned decision.
//!
//! The caller owns a [`context::ConversationContext`] per supplier thread
//! and feeds it back each turn; per-turn extractions merge into a quote
//! record that converges over the conversation.

pub mod config;
pub mod context;
pub mod experts;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod providers;
pub mod response;
pub mod types;
