//! 本机状态存储
//!
//! 按键保存整块 JSON，键大小写不敏感；`save` 整体替换旧值，从不按字段合并。
//! `get` 返回 `None` 只表示「从未保存」，保存过的 JSON `null` 会原样返回 `Some(Value::Null)`。

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::VcError;

/// 状态存储接口
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 读取；`None` 表示该键从未保存
    async fn get(&self, key: &str, ct: &CancellationToken) -> Result<Option<Value>, VcError>;

    /// 保存（整体替换）
    async fn save(&self, key: &str, value: Value, ct: &CancellationToken) -> Result<(), VcError>;

    /// 删除；返回该键此前是否存在
    async fn delete(&self, key: &str, ct: &CancellationToken) -> Result<bool, VcError>;
}

/// 强类型读写
#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn get_state<T>(&self, key: &str, ct: &CancellationToken) -> Result<Option<T>, VcError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key, ct).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn save_state<T>(&self, key: &str, state: &T, ct: &CancellationToken) -> Result<(), VcError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(state)?;
        self.save(key, value, ct).await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// 键规范化：去首尾空白并转小写；空键非法
pub(crate) fn normalize_key(key: &str) -> Result<String, VcError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(VcError::InvalidOperation("state key must not be empty".into()));
    }
    Ok(key.to_lowercase())
}

pub(crate) fn check_cancelled(ct: &CancellationToken) -> Result<(), VcError> {
    if ct.is_cancelled() {
        Err(VcError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Checkpoint {
        succeeded: bool,
        attempts: u32,
    }

    #[tokio::test]
    async fn test_typed_helpers_through_trait_object() {
        let store: Box<dyn StateStore> = Box::new(InMemoryStateStore::new());
        let ct = CancellationToken::new();
        let value = Checkpoint { succeeded: true, attempts: 2 };

        store.save_state("Install-Redis", &value, &ct).await.unwrap();
        let loaded: Option<Checkpoint> = store.get_state("install-redis", &ct).await.unwrap();
        assert_eq!(loaded, Some(value));

        let missing: Option<Checkpoint> = store.get_state("other", &ct).await.unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  DBReady ").unwrap(), "dbready");
        assert!(normalize_key("   ").is_err());
    }
}
