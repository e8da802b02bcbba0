//! Keyword matching of events against automations.

use autoreply_core::{Automation, Event};
use std::sync::Arc;

/// Evaluates normalized events against a snapshot of automations.
///
/// Every matching automation fires; there is no priority between them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutomationMatcher;

impl AutomationMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Automations from `candidates` that fire for `event`, in snapshot order.
    pub fn find_matches(&self, event: &Event, candidates: &[Arc<Automation>]) -> Vec<Arc<Automation>> {
        let text = event.text.to_lowercase();
        candidates
            .iter()
            .filter(|automation| self.is_match(automation, event, &text))
            .cloned()
            .collect()
    }

    /// Check a single automation. `lowered_text` is the event text in lower case.
    pub fn is_match(&self, automation: &Automation, event: &Event, lowered_text: &str) -> bool {
        automation.active
            && automation.trigger_type == event.kind.trigger_type()
            && automation.target_scope.includes(event.scope_ids())
            && contains_keyword(&automation.keywords, lowered_text)
    }
}

/// Case-insensitive substring test; blank keywords never match.
fn contains_keyword(keywords: &[String], lowered_text: &str) -> bool {
    keywords.iter().any(|keyword| {
        let keyword = keyword.trim();
        !keyword.is_empty() && lowered_text.contains(&keyword.to_lowercase())
    })
}
