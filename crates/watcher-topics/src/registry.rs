use std::sync::Arc;

use watcher_store::model::Topic;
use watcher_store::Store;

use crate::budget::{classify, BudgetGroup};
use crate::error::Result;
use crate::key::TopicKey;

/// Front door for topic creation and lookup. Thin wrapper over the store
/// that adds key validation and budget-group classification — the parts
/// of §4.B that don't belong inside persistence itself.
pub struct TopicRegistry {
    store: Arc<Store>,
}

impl TopicRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Ensure `key` exists, creating it `provisional` on first reference.
    pub fn ensure(&self, key: &TopicKey) -> Result<Topic> {
        let rendered = key.render();
        Ok(self
            .store
            .upsert_topic(&rendered, key.category.as_str(), key.scope.as_deref().unwrap_or("global"), true)?)
    }

    pub fn get(&self, key: &TopicKey) -> Result<Option<Topic>> {
        Ok(self.store.get_topic(&key.render())?)
    }

    pub fn budget_group(&self, key: &TopicKey) -> BudgetGroup {
        classify(key)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
