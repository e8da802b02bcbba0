//! Backing storage for automation definitions.

use async_trait::async_trait;
use autoreply_core::{Automation, AutomationId};
use dashmap::DashMap;

use crate::{EngineError, Result};

/// In-place mutation applied atomically to a stored automation.
pub type AutomationUpdate = Box<dyn FnOnce(&mut Automation) + Send>;

/// Automation storage trait
#[async_trait]
pub trait AutomationStore: Send + Sync {
    /// Store a new automation
    async fn insert(&self, automation: &Automation) -> Result<()>;

    /// Get automation by ID
    async fn get(&self, id: AutomationId) -> Result<Option<Automation>>;

    /// List all automations
    async fn list(&self) -> Result<Vec<Automation>>;

    /// Apply an update to a stored automation, returning the new value
    async fn modify(&self, id: AutomationId, update: AutomationUpdate) -> Result<Automation>;

    /// Delete an automation, returning whether it existed
    async fn delete(&self, id: AutomationId) -> Result<bool>;
}

/// In-memory automation store
pub struct InMemoryAutomationStore {
    automations: DashMap<AutomationId, Automation>,
}

impl InMemoryAutomationStore {
    pub fn new() -> Self {
        Self {
            automations: DashMap::new(),
        }
    }
}

impl Default for InMemoryAutomationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationStore for InMemoryAutomationStore {
    async fn insert(&self, automation: &Automation) -> Result<()> {
        self.automations.insert(automation.id, automation.clone());
        Ok(())
    }

    async fn get(&self, id: AutomationId) -> Result<Option<Automation>> {
        Ok(self.automations.get(&id).map(|a| a.clone()))
    }

    async fn list(&self) -> Result<Vec<Automation>> {
        Ok(self.automations.iter().map(|a| a.clone()).collect())
    }

    async fn modify(&self, id: AutomationId, update: AutomationUpdate) -> Result<Automation> {
        let mut entry = self
            .automations
            .get_mut(&id)
            .ok_or(EngineError::NotFound(id))?;
        update(entry.value_mut());
        Ok(entry.clone())
    }

    async fn delete(&self, id: AutomationId) -> Result<bool> {
        Ok(self.automations.remove(&id).is_some())
    }
}
