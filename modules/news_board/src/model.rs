use appkit::model::DomainModel;
use appkit::storage::StoragePool;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
}

/// In-memory news items keyed by id.
#[derive(Debug, Default)]
pub struct NewsStore {
    items: RwLock<BTreeMap<String, NewsItem>>,
}

impl NewsStore {
    pub fn all(&self) -> BTreeMap<String, NewsItem> {
        self.items.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<NewsItem> {
        self.items.read().get(id).cloned()
    }

    /// Insert or replace.
    pub fn put(&self, id: &str, title: &str) -> NewsItem {
        let item = NewsItem {
            title: title.to_string(),
        };
        self.items.write().insert(id.to_string(), item.clone());
        item
    }

    pub fn remove(&self, id: &str) -> Option<NewsItem> {
        self.items.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

/// Domain model exposing a [`NewsStore`] to route handlers.
///
/// Items survive a close/open cycle of the application; only [`NewsModel::seeded`] data
/// is present initially.
#[derive(Debug, Default)]
pub struct NewsModel {
    store: Arc<NewsStore>,
}

impl NewsModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// `a: aaa`, `b: bbb`, `c: ccc`.
    pub fn seeded() -> Self {
        let model = Self::new();
        for (id, title) in [("a", "aaa"), ("b", "bbb"), ("c", "ccc")] {
            model.store.put(id, title);
        }
        model
    }

    pub fn store(&self) -> Arc<NewsStore> {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl DomainModel for NewsModel {
    fn name(&self) -> &str {
        "news"
    }

    async fn open(&self, _storage: Arc<StoragePool>) -> anyhow::Result<()> {
        tracing::info!(items = self.store.len(), "news model opened");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        tracing::info!("news model closed");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_store_holds_three_items() {
        let model = NewsModel::seeded();
        let store = model.store();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("b").unwrap().title, "bbb");

        store.put("d", "ddd");
        assert_eq!(store.remove("d").unwrap().title, "ddd");
        assert!(store.remove("d").is_none());
    }
}
