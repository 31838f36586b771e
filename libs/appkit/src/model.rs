use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

use crate::storage::StoragePool;

/// Application domain model: opened after storage, closed before it.
#[async_trait]
pub trait DomainModel: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn open(&self, storage: Arc<StoragePool>) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Downcast helper for handlers that know the concrete model type.
pub fn model_as<T: 'static>(model: &dyn DomainModel) -> Option<&T> {
    model.as_any().downcast_ref::<T>()
}

/// Model for applications without domain state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullModel;

#[async_trait]
impl DomainModel for NullModel {
    fn name(&self) -> &str {
        "null"
    }

    async fn open(&self, _storage: Arc<StoragePool>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
