//! 内存状态存储（测试与单进程多角色场景）

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{check_cancelled, normalize_key, StateStore};
use crate::core::VcError;

#[derive(Default)]
pub struct InMemoryStateStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str, ct: &CancellationToken) -> Result<Option<Value>, VcError> {
        check_cancelled(ct)?;
        let key = normalize_key(key)?;
        Ok(self.entries.read().await.get(&key).cloned())
    }

    async fn save(&self, key: &str, value: Value, ct: &CancellationToken) -> Result<(), VcError> {
        check_cancelled(ct)?;
        let key = normalize_key(key)?;
        self.entries.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str, ct: &CancellationToken) -> Result<bool, VcError> {
        check_cancelled(ct)?;
        let key = normalize_key(key)?;
        Ok(self.entries.write().await.remove(&key).is_some())
    }
}
