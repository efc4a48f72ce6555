//! 跨机状态交换
//!
//! 一方 `publish` 命名状态，对端 `wait_for` 轮询直到谓词满足，这是所有角色间握手的基础。
//! 网络实现（`HttpCoordinationClient` + `server`）与进程内实现（`InMemoryCoordinationClient`）
//! 行为一致，测试中多个角色可以共享同一个进程内实例。

mod http;
mod memory;
pub mod server;

pub use http::{HttpCoordinationClient, HttpMethodKind, RetryPolicy};
pub use memory::InMemoryCoordinationClient;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::VcError;

/// 线上的状态信封：`{ "id", "created", "lastModified", "definition" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateItem {
    pub id: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub definition: Value,
}

impl StateItem {
    pub fn new(id: impl Into<String>, definition: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created: now,
            last_modified: now,
            definition,
        }
    }

    /// 替换内容，保留创建时间
    pub fn replaced(mut self, definition: Value) -> Self {
        self.definition = definition;
        self.last_modified = Utc::now();
        self
    }

    /// 解析信封；不是信封格式的 JSON 视为裸状态
    pub fn from_value(id: &str, value: Value) -> Self {
        let is_envelope = value
            .as_object()
            .is_some_and(|o| o.contains_key("definition") && o.contains_key("id"));
        if is_envelope {
            if let Ok(item) = serde_json::from_value::<StateItem>(value.clone()) {
                return item;
            }
        }
        Self::new(id, value)
    }
}

/// 协调客户端接口
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// 发布（创建或整体替换）状态
    async fn publish(&self, key: &str, state: Value, ct: &CancellationToken) -> Result<(), VcError>;

    /// 读取状态；`None` 表示对端尚未发布
    async fn try_get(&self, key: &str, ct: &CancellationToken) -> Result<Option<Value>, VcError>;

    /// 删除状态；键不存在不是错误
    async fn delete(&self, key: &str, ct: &CancellationToken) -> Result<(), VcError>;

    /// 对端 API 是否在线
    async fn is_online(&self, _ct: &CancellationToken) -> bool {
        true
    }
}

/// 轮询等待
#[async_trait]
pub trait CoordinationClientExt: CoordinationClient {
    /// 每 `interval` 轮询一次 `try_get`，直到谓词满足；
    /// 404 与连接失败都视为「还没好」，超过 `timeout` 返回 `VcError::Timeout`，外部取消返回 `Cancelled`
    async fn wait_for<F>(
        &self,
        key: &str,
        predicate: F,
        interval: Duration,
        timeout: Duration,
        ct: &CancellationToken,
    ) -> Result<Value, VcError>
    where
        F: Fn(&Value) -> bool + Send + Sync,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let interval = interval.max(Duration::from_millis(1));
        let mut polls: u64 = 0;

        loop {
            if ct.is_cancelled() {
                return Err(VcError::Cancelled);
            }

            polls += 1;
            // 单次轮询（含传输层重试）也不能越过 timeout + interval
            let budget = (deadline + interval).saturating_duration_since(Instant::now());
            let polled = match tokio::time::timeout(budget, self.try_get(key, ct)).await {
                Ok(polled) => polled,
                Err(_) => {
                    return Err(VcError::Timeout {
                        key: key.to_string(),
                        waited: started.elapsed(),
                    })
                }
            };
            match polled {
                Ok(Some(state)) if predicate(&state) => {
                    tracing::debug!(key = %key, polls, "state condition satisfied");
                    return Ok(state);
                }
                Ok(_) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if is_not_yet_online(&e) => {
                    tracing::debug!(key = %key, "coordination API not reachable yet: {}", e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(key = %key, polls, "timed out waiting for state");
                return Err(VcError::Timeout {
                    key: key.to_string(),
                    waited: now - started,
                });
            }

            let pause = interval.min(deadline - now);
            tokio::select! {
                _ = ct.cancelled() => return Err(VcError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// 等待对端 API 在线（心跳）
    async fn wait_for_online(
        &self,
        interval: Duration,
        timeout: Duration,
        ct: &CancellationToken,
    ) -> Result<(), VcError> {
        let started = Instant::now();
        loop {
            if self.is_online(ct).await {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(VcError::Timeout {
                    key: "heartbeat".into(),
                    waited: started.elapsed(),
                });
            }
            tokio::select! {
                _ = ct.cancelled() => return Err(VcError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

impl<C: CoordinationClient + ?Sized> CoordinationClientExt for C {}

/// 连接层失败（无 HTTP 状态码）：对端 API 可能尚未启动
fn is_not_yet_online(err: &VcError) -> bool {
    matches!(err, VcError::Api { status: None, .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// 永远不满足谓词、并统计轮询次数的客户端
    #[derive(Default)]
    struct CountingClient {
        polls: AtomicU64,
        offline: bool,
    }

    #[async_trait]
    impl CoordinationClient for CountingClient {
        async fn publish(&self, _: &str, _: Value, _: &CancellationToken) -> Result<(), VcError> {
            Ok(())
        }

        async fn try_get(&self, _: &str, _: &CancellationToken) -> Result<Option<Value>, VcError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.offline {
                return Err(VcError::api("connection refused", None));
            }
            Ok(Some(json!({"status": "Pending"})))
        }

        async fn delete(&self, _: &str, _: &CancellationToken) -> Result<(), VcError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_wait_for_times_out_within_bound_and_polls_enough() {
        let client = CountingClient::default();
        let interval = Duration::from_millis(20);
        let timeout = Duration::from_millis(200);
        let ct = CancellationToken::new();

        let started = Instant::now();
        let err = client
            .wait_for("DBReady", |v| v["status"] == "Ready", interval, timeout, &ct)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, VcError::Timeout { .. }));
        assert!(elapsed >= timeout);
        // 调度抖动留出余量
        assert!(elapsed <= timeout + interval + Duration::from_millis(100));
        assert!(client.polls.load(Ordering::SeqCst) >= (timeout.as_millis() / interval.as_millis()) as u64);
    }

    #[tokio::test]
    async fn test_connection_errors_count_as_not_yet() {
        let client = CountingClient {
            offline: true,
            ..Default::default()
        };
        let ct = CancellationToken::new();
        let err = client
            .wait_for("k", |_| true, Duration::from_millis(5), Duration::from_millis(30), &ct)
            .await
            .unwrap_err();
        assert!(matches!(err, VcError::Timeout { .. }));
        assert!(client.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_wait_for_distinguishes_cancellation() {
        let client = Arc::new(CountingClient::default());
        let ct = CancellationToken::new();
        let c = ct.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            c.cancel();
        });
        let err = client
            .wait_for("k", |_| false, Duration::from_millis(10), Duration::from_secs(30), &ct)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_for_returns_matching_state() {
        let client = InMemoryCoordinationClient::new();
        let ct = CancellationToken::new();
        let publisher = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher
                .publish("DBReady", json!({"database": "tpcc"}), &CancellationToken::new())
                .await
                .unwrap();
        });
        let state = client
            .wait_for("dbready", |_| true, Duration::from_millis(5), Duration::from_secs(5), &ct)
            .await
            .unwrap();
        assert_eq!(state["database"], "tpcc");
    }

    #[test]
    fn test_state_item_envelope_format() {
        let item = StateItem::new("DBReady", json!({"a": 1}));
        let v = serde_json::to_value(&item).unwrap();
        assert!(v.get("lastModified").is_some());
        assert_eq!(v["definition"]["a"], 1);
        assert_eq!(StateItem::from_value("DBReady", v).definition, json!({"a": 1}));
        assert_eq!(StateItem::from_value("raw", json!([1, 2])).definition, json!([1, 2]));
    }
}
