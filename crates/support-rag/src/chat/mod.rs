//! Per-customer conversation state.

use crate::llm::{ChatMessage, ChatRole};
use crate::privacy::PrivacyFilter;
use crate::retrieval::PurchaseRetriever;
use crate::types::CustomerId;

/// Raw and redacted views of the same conversation. Both sequences always
/// have the same length and the same roles at each position.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    raw: Vec<ChatMessage>,
    redacted: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, storing its redacted form alongside.
    pub fn push(&mut self, message: ChatMessage, filter: &PrivacyFilter) {
        let redacted = filter.redact(message.clone());
        self.raw.push(message);
        self.redacted.push(redacted);
    }

    pub fn push_user(&mut self, content: impl Into<String>, filter: &PrivacyFilter) {
        self.push(ChatMessage::user(content), filter);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, filter: &PrivacyFilter) {
        self.push(ChatMessage::assistant(content), filter);
    }

    pub fn raw(&self) -> &[ChatMessage] {
        &self.raw
    }

    pub fn redacted(&self) -> &[ChatMessage] {
        &self.redacted
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Completed user turns in the buffer.
    pub fn user_turns(&self) -> usize {
        self.raw.iter().filter(|m| m.role == ChatRole::User).count()
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.redacted.clear();
    }

    /// Keep only the last `turns` user turns (each user message with the
    /// replies that follow it). Zero empties the conversation.
    pub fn apply_retention(&mut self, turns: usize) {
        if turns == 0 {
            self.clear();
            return;
        }
        let user_positions: Vec<usize> = self
            .raw
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == ChatRole::User)
            .map(|(i, _)| i)
            .collect();
        if user_positions.len() <= turns {
            return;
        }
        let cut = user_positions[user_positions.len() - turns];
        self.raw.drain(..cut);
        self.redacted.drain(..cut);
    }
}

/// Everything one connected customer owns: their purchase aggregates and
/// their conversation. Turns for a session are processed one at a time.
pub struct CustomerSession {
    pub customer_id: CustomerId,
    pub purchases: PurchaseRetriever,
    pub conversation: Conversation,
}

impl CustomerSession {
    pub fn new(purchases: PurchaseRetriever) -> Self {
        Self {
            customer_id: purchases.customer_id(),
            purchases,
            conversation: Conversation::new(),
        }
    }
}
