//! 文件状态存储：每个键一个 JSON 文件
//!
//! 文件名由规范化（小写）后的键编码而来，非 `[a-z0-9._-]` 字符写作 `%XX`，
//! 因而不同键不会落到同一文件。写入先写同目录临时文件再 rename，读者看不到半写状态。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::{check_cancelled, normalize_key, StateStore};
use crate::core::VcError;

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// 创建并确保目录存在
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, VcError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, VcError> {
        let key = normalize_key(key)?;
        Ok(self.dir.join(format!("{}.json", encode_file_name(&key))))
    }
}

fn encode_file_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(b as char),
            // 开头的 '.' 会生成隐藏文件，一律编码
            b'.' if !out.is_empty() => out.push('.'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str, ct: &CancellationToken) -> Result<Option<Value>, VcError> {
        check_cancelled(ct)?;
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: Value, ct: &CancellationToken) -> Result<(), VcError> {
        check_cancelled(ct)?;
        let path = self.path_for(key)?;
        let content = serde_json::to_vec_pretty(&value)?;
        let tmp = self
            .dir
            .join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

        fs::write(&tmp, &content).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(key = %key, path = %path.display(), "state saved");
        Ok(())
    }

    async fn delete(&self, key: &str, ct: &CancellationToken) -> Result<bool, VcError> {
        check_cancelled(ct)?;
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ct = CancellationToken::new();
        {
            let store = FileStateStore::open(dir.path()).await.unwrap();
            store.save("Redis/Install", json!({"succeeded": true}), &ct).await.unwrap();
        }
        let reopened = FileStateStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("redis/install", &ct).await.unwrap(),
            Some(json!({"succeeded": true}))
        );
    }

    #[tokio::test]
    async fn test_missing_key_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).await.unwrap();
        let ct = CancellationToken::new();
        assert_eq!(store.get("absent", &ct).await.unwrap(), None);
        store.save("present", Value::Null, &ct).await.unwrap();
        assert_eq!(store.get("PRESENT", &ct).await.unwrap(), Some(Value::Null));
        assert!(store.delete("present", &ct).await.unwrap());
        assert!(!store.delete("present", &ct).await.unwrap());
    }

    #[test]
    fn test_file_names_do_not_collide() {
        assert_ne!(encode_file_name("a/b"), encode_file_name("a_b"));
        assert_eq!(encode_file_name("dbready"), "dbready");
        assert!(!encode_file_name("..").starts_with('.'));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).await.unwrap();
        let ct = CancellationToken::new();
        for i in 0..5 {
            store.save("k", json!(i), &ct).await.unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.get("k", &ct).await.unwrap(), Some(json!(4)));
    }
}
