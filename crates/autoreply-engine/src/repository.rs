//! Read-mostly automation repository.
//!
//! Writes go through to the backing [`AutomationStore`] and then rebuild an
//! immutable [`AutomationSnapshot`] that is swapped in atomically. Matching
//! always reads one snapshot, so a concurrent edit is either fully visible
//! or not visible at all.

use arc_swap::ArcSwap;
use autoreply_core::{Automation, AutomationId, EventKind, TriggerType};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::AutomationStore;
use crate::{EngineError, Result};

/// Point-in-time view of the active automations.
#[derive(Debug, Default)]
pub struct AutomationSnapshot {
    version: u64,
    comment: Vec<Arc<Automation>>,
    dm: Vec<Arc<Automation>>,
}

impl AutomationSnapshot {
    /// Build a snapshot from stored automations.
    ///
    /// Each trigger list is ordered by creation time, ties broken by id.
    pub fn build(version: u64, mut automations: Vec<Automation>) -> Self {
        sort_by_creation(&mut automations);

        let mut snapshot = Self {
            version,
            ..Default::default()
        };
        for automation in automations.into_iter().filter(|a| a.active) {
            match automation.trigger_type {
                TriggerType::Comment => snapshot.comment.push(Arc::new(automation)),
                TriggerType::Dm => snapshot.dm.push(Arc::new(automation)),
            }
        }
        snapshot
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Active automations for a trigger type, in creation order.
    pub fn active(&self, trigger_type: TriggerType) -> &[Arc<Automation>] {
        match trigger_type {
            TriggerType::Comment => &self.comment,
            TriggerType::Dm => &self.dm,
        }
    }

    pub fn active_count(&self) -> usize {
        self.comment.len() + self.dm.len()
    }
}

fn sort_by_creation(automations: &mut [Automation]) {
    automations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

/// Automation repository with a write-through snapshot cache
pub struct AutomationRepository {
    store: Arc<dyn AutomationStore>,
    snapshot: ArcSwap<AutomationSnapshot>,
    version: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl AutomationRepository {
    /// Create a repository over a store, starting from an empty snapshot.
    ///
    /// Call [`refresh`](Self::refresh) once to load existing definitions.
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self {
            store,
            snapshot: ArcSwap::from_pointee(AutomationSnapshot::default()),
            version: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<AutomationSnapshot> {
        self.snapshot.load_full()
    }

    /// Active automations for a trigger type from the current snapshot.
    pub fn snapshot_active_automations(&self, trigger_type: TriggerType) -> Vec<Arc<Automation>> {
        self.snapshot.load().active(trigger_type).to_vec()
    }

    pub fn active_count(&self) -> usize {
        self.snapshot.load().active_count()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Reload every definition from the store and swap in a new snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        let automations = self.store.list().await?;
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = AutomationSnapshot::build(version, automations);

        debug!(
            version,
            active = snapshot.active_count(),
            "Automation snapshot refreshed"
        );
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    /// Periodically revalidate the snapshot against the store.
    pub fn spawn_revalidation(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Starting automation revalidation");
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Automation revalidation failed");
                }
            }
        })
    }

    /// Store a new automation.
    pub async fn create(&self, automation: Automation) -> Result<Automation> {
        self.store.insert(&automation).await?;
        self.refresh().await?;
        info!(automation_id = %automation.id, name = %automation.name, "Automation created");
        Ok(automation)
    }

    /// Latest stored version of an automation, bypassing the snapshot.
    pub async fn get(&self, id: AutomationId) -> Result<Option<Automation>> {
        self.store.get(id).await
    }

    /// All automations ordered by creation.
    pub async fn list(&self) -> Result<Vec<Automation>> {
        let mut automations = self.store.list().await?;
        sort_by_creation(&mut automations);
        Ok(automations)
    }

    /// Replace an automation's definition, keeping its history.
    pub async fn replace(&self, id: AutomationId, definition: Automation) -> Result<Automation> {
        let updated = self
            .store
            .modify(id, Box::new(move |a| a.replace_definition(definition)))
            .await?;
        self.refresh().await?;
        info!(automation_id = %id, "Automation updated");
        Ok(updated)
    }

    /// Delete an automation.
    pub async fn delete(&self, id: AutomationId) -> Result<()> {
        if !self.store.delete(id).await? {
            return Err(EngineError::NotFound(id));
        }
        self.refresh().await?;
        info!(automation_id = %id, "Automation deleted");
        Ok(())
    }

    /// Record a successful send: last trigger time and per-kind counter.
    pub async fn record_sent(
        &self,
        id: AutomationId,
        kind: EventKind,
        at: DateTime<Utc>,
    ) -> Result<Automation> {
        let updated = self
            .store
            .modify(id, Box::new(move |a| a.record_sent(kind, at)))
            .await?;
        self.refresh().await?;
        Ok(updated)
    }

    /// Flag an automation as failing.
    pub async fn mark_error(&self, id: AutomationId) -> Result<Automation> {
        let updated = self.store.modify(id, Box::new(|a| a.mark_error())).await?;
        self.refresh().await?;
        warn!(automation_id = %id, "Automation marked as error");
        Ok(updated)
    }
}
