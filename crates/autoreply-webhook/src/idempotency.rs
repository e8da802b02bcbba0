//! Delivery deduplication
//!
//! The platform redelivers webhooks it considers unacknowledged. Each event
//! key is marked once; a second mark inside the TTL reports a duplicate.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of marking an event key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    FirstSeen,
    Duplicate,
}

/// TTL-bounded set of seen event keys
pub struct IdempotencyStore {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Atomically test and mark a key. Exactly one concurrent caller
    /// observes `FirstSeen` for a key; an expired mark counts as unseen.
    pub fn check_and_mark(&self, key: &str) -> MarkOutcome {
        let now = Instant::now();
        match self.seen.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= self.ttl {
                    entry.insert(now);
                    MarkOutcome::FirstSeen
                } else {
                    MarkOutcome::Duplicate
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                MarkOutcome::FirstSeen
            }
        }
    }

    /// Whether a key is currently marked
    pub fn contains(&self, key: &str) -> bool {
        self.seen
            .get(key)
            .map(|marked| marked.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Drop marks older than the TTL, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.seen.len();
        let ttl = self.ttl;
        self.seen.retain(|_, marked| marked.elapsed() < ttl);
        before.saturating_sub(self.seen.len())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Periodically purge expired marks
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = self.len(), "Purged expired event keys");
                }
            }
        })
    }
}
