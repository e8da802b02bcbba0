//! Dashboard metrics
//!
//! Monotonic engagement and response counters plus a rolling trend of sent
//! responses. The active automation count is read from the repository
//! snapshot rather than counted here.

use autoreply_core::{EventKind, MetricsSnapshot};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::repository::AutomationRepository;

/// Aggregates counters consumed by the dashboard
pub struct MetricsAggregator {
    repository: Arc<AutomationRepository>,
    engagement_count: AtomicU64,
    comment_responses: AtomicU64,
    dm_responses: AtomicU64,
    /// Send times within the last two trend windows
    recent_sends: Mutex<VecDeque<Instant>>,
    /// `f64` bits of the last computed trend
    trend: AtomicU64,
    window: Duration,
}

impl MetricsAggregator {
    pub fn new(repository: Arc<AutomationRepository>, window: Duration) -> Self {
        Self {
            repository,
            engagement_count: AtomicU64::new(0),
            comment_responses: AtomicU64::new(0),
            dm_responses: AtomicU64::new(0),
            recent_sends: Mutex::new(VecDeque::new()),
            trend: AtomicU64::new(0f64.to_bits()),
            window,
        }
    }

    /// Count a first-seen inbound event.
    pub fn record_engagement(&self) {
        self.engagement_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a sent response for an event of the given kind.
    pub fn record_response(&self, kind: EventKind) {
        match kind {
            EventKind::Comment => self.comment_responses.fetch_add(1, Ordering::Relaxed),
            EventKind::DirectMessage => self.dm_responses.fetch_add(1, Ordering::Relaxed),
        };
        self.recent_sends.lock().push_back(Instant::now());
    }

    /// Recompute the rolling trend and drop send times older than two windows.
    pub fn recompute_trend(&self) -> f64 {
        let now = Instant::now();
        let (current, previous) = {
            let mut sends = self.recent_sends.lock();
            if let Some(horizon) = now.checked_sub(self.window * 2) {
                while sends.front().is_some_and(|t| *t <= horizon) {
                    sends.pop_front();
                }
            }
            match now.checked_sub(self.window) {
                Some(boundary) => {
                    let previous = sends.iter().take_while(|t| **t <= boundary).count();
                    (sends.len() - previous, previous)
                }
                None => (sends.len(), 0),
            }
        };

        let trend = trend_percent(current as u64, previous as u64);
        self.trend.store(trend.to_bits(), Ordering::Relaxed);
        trend
    }

    /// Current snapshot; the trend is recomputed on read.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let trend = self.recompute_trend();
        MetricsSnapshot {
            engagement_count: self.engagement_count.load(Ordering::Relaxed),
            dm_responses: self.dm_responses.load(Ordering::Relaxed),
            comment_responses: self.comment_responses.load(Ordering::Relaxed),
            active_automations: self.repository.active_count() as u64,
            trend,
        }
    }

    /// Last trend computed, without recomputing.
    pub fn last_trend(&self) -> f64 {
        f64::from_bits(self.trend.load(Ordering::Relaxed))
    }

    /// Periodically recompute the trend.
    pub fn spawn_trend_recompute(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Starting trend recomputation");
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let trend = self.recompute_trend();
                debug!(trend, "Trend recomputed");
            }
        })
    }
}

/// Percentage change of `current` against `previous`.
fn trend_percent(current: u64, previous: u64) -> f64 {
    match (current, previous) {
        (0, 0) => 0.0,
        (_, 0) => 100.0,
        (current, previous) => (current as f64 - previous as f64) / previous as f64 * 100.0,
    }
}
