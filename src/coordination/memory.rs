//! 进程内协调客户端：clone 共享同一份状态，供同机多角色测试使用

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{CoordinationClient, StateItem};
use crate::core::VcError;
use crate::state::{InMemoryStateStore, StateStore, StateStoreExt};

#[derive(Clone, Default)]
pub struct InMemoryCoordinationClient {
    store: Arc<InMemoryStateStore>,
}

impl InMemoryCoordinationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取完整信封（测试可据此检查 created / lastModified）
    pub async fn get_item(&self, key: &str, ct: &CancellationToken) -> Result<Option<StateItem>, VcError> {
        self.store.get_state(key, ct).await
    }
}

#[async_trait]
impl CoordinationClient for InMemoryCoordinationClient {
    async fn publish(&self, key: &str, state: Value, ct: &CancellationToken) -> Result<(), VcError> {
        let item = match self.get_item(key, ct).await? {
            Some(existing) => existing.replaced(state),
            None => StateItem::new(key, state),
        };
        self.store.save_state(key, &item, ct).await
    }

    async fn try_get(&self, key: &str, ct: &CancellationToken) -> Result<Option<Value>, VcError> {
        Ok(self.get_item(key, ct).await?.map(|item| item.definition))
    }

    async fn delete(&self, key: &str, ct: &CancellationToken) -> Result<(), VcError> {
        self.store.delete(key, ct).await.map(|_| ())
    }
}
