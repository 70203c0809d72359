//! Conversation state for one negotiation thread.
//!
//! The caller owns a [`ConversationContext`] per supplier conversation and
//! feeds it back into each pipeline invocation. It holds the ordered
//! message log plus the cumulative merged extraction. Not thread-safe by
//! design -- one context per in-flight conversation.

use chrono::Utc;

use crate::types::{ExtractedQuoteData, Message, MessageRole};

/// Ordered message log plus the rolling merged quote extraction.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    messages: Vec<Message>,
    merged: ExtractedQuoteData,
}

impl ConversationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message sent by the agent.
    pub fn add_agent_message(&mut self, text: impl Into<String>) {
        self.push(MessageRole::Agent, text.into());
    }

    /// Append a message received from the supplier.
    pub fn add_supplier_message(&mut self, text: impl Into<String>) {
        self.push(MessageRole::Supplier, text.into());
    }

    fn push(&mut self, role: MessageRole, text: String) {
        self.messages.push(Message {
            role,
            text,
            timestamp: Utc::now(),
        });
    }

    /// Merge a newer per-turn extraction into the cumulative record.
    ///
    /// Field-wise overwrite where the newer field is set; unset fields
    /// never erase earlier values.
    pub fn merge_extraction(&mut self, newer: &ExtractedQuoteData) {
        self.merged.merge(newer);
    }

    /// Render the thread for prompt embedding, one `[ROLE] text` line per
    /// message in insertion order.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            out.push('[');
            out.push_str(&message.role.to_string());
            out.push_str("] ");
            out.push_str(&message.text);
            out.push('\n');
        }
        out.trim_end().to_owned()
    }

    /// Number of messages in the thread.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The messages in insertion order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The cumulative merged extraction.
    pub fn merged_data(&self) -> &ExtractedQuoteData {
        &self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_keep_insertion_order() {
        let mut ctx = ConversationContext::new();
        ctx.add_agent_message("Hi, could you quote SKU-1?");
        ctx.add_supplier_message("Sure, $4.50/unit.");
        ctx.add_agent_message("What is the lead time?");

        assert_eq!(ctx.message_count(), 3);
        assert_eq!(ctx.messages()[0].role, MessageRole::Agent);
        assert_eq!(ctx.messages()[1].role, MessageRole::Supplier);
        assert_eq!(ctx.messages()[2].text, "What is the lead time?");
    }

    #[test]
    fn test_format_for_prompt() {
        let mut ctx = ConversationContext::new();
        ctx.add_agent_message("Requesting a quote for 500 units.");
        ctx.add_supplier_message("$4.50/unit, MOQ 500.");

        let rendered = ctx.format_for_prompt();
        assert_eq!(
            rendered,
            "[AGENT] Requesting a quote for 500 units.\n[SUPPLIER] $4.50/unit, MOQ 500."
        );
    }

    #[test]
    fn test_format_for_prompt_empty() {
        assert_eq!(ConversationContext::new().format_for_prompt(), "");
    }

    #[test]
    fn test_merge_accumulates_across_turns() {
        let mut ctx = ConversationContext::new();
        ctx.merge_extraction(&ExtractedQuoteData {
            quoted_price: Some(4.5),
            ..ExtractedQuoteData::default()
        });
        ctx.merge_extraction(&ExtractedQuoteData {
            moq: Some(500),
            ..ExtractedQuoteData::default()
        });

        let merged = ctx.merged_data();
        assert_eq!(merged.quoted_price, Some(4.5), "earlier field survives");
        assert_eq!(merged.moq, Some(500), "later field lands");
    }
}
