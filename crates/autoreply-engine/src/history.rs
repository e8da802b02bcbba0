//! Per-author conversation memory for AI replies.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::reply::ChatMessage;

struct Conversation {
    turns: VecDeque<ChatMessage>,
    last_touched: Instant,
}

/// Bounded log of exchanged messages keyed by `(account, author)`.
///
/// Conversations nobody has written to for a while are dropped by
/// [`ConversationLog::purge_idle`].
pub struct ConversationLog {
    conversations: DashMap<(String, String), Conversation>,
    limit: usize,
}

impl ConversationLog {
    /// Create a log keeping at most `limit` messages per conversation.
    pub fn new(limit: usize) -> Self {
        Self {
            conversations: DashMap::new(),
            limit,
        }
    }

    /// Messages exchanged so far, oldest first.
    pub fn history(&self, account_id: &str, author_id: &str) -> Vec<ChatMessage> {
        self.conversations
            .get(&(account_id.to_string(), author_id.to_string()))
            .map(|conversation| conversation.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append one user message and the reply that answered it.
    pub fn record(&self, account_id: &str, author_id: &str, user_text: &str, reply: &str) {
        if self.limit == 0 {
            return;
        }

        let mut conversation = self
            .conversations
            .entry((account_id.to_string(), author_id.to_string()))
            .or_insert_with(|| Conversation {
                turns: VecDeque::new(),
                last_touched: Instant::now(),
            });
        conversation.last_touched = Instant::now();
        let turns = &mut conversation.turns;
        turns.push_back(ChatMessage::user(user_text));
        turns.push_back(ChatMessage::assistant(reply));
        while turns.len() > self.limit {
            turns.pop_front();
        }
    }

    /// Drop conversations not written to within `ttl`. Returns how many
    /// were removed.
    pub fn purge_idle(&self, ttl: Duration) -> usize {
        let before = self.conversations.len();
        self.conversations
            .retain(|_, conversation| conversation.last_touched.elapsed() < ttl);
        before.saturating_sub(self.conversations.len())
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
