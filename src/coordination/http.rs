//! HTTP 协调客户端
//!
//! `PUT /api/state/{key}` 发布信封，`GET` 返回 200+信封或 404，`DELETE` 返回 200/204，
//! `GET /api/heartbeat` 判断对端在线。连接失败与瞬时状态码按指数退避重试；
//! 非瞬时状态码（按请求方法区分）立即返回。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{CoordinationClient, StateItem};
use crate::config::ApiSection;
use crate::core::VcError;

/// 请求类别：决定哪些状态码不值得重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethodKind {
    Get,
    Write,
    Delete,
}

impl HttpMethodKind {
    fn of(method: &Method) -> Self {
        if *method == Method::GET || *method == Method::HEAD {
            Self::Get
        } else if *method == Method::DELETE {
            Self::Delete
        } else {
            Self::Write
        }
    }

    /// 重试也不会改变结果的状态码
    pub fn is_non_transient(self, status: u16) -> bool {
        match self {
            Self::Get => matches!(status, 400 | 401 | 403 | 404 | 423 | 505 | 511),
            Self::Write => matches!(status, 400 | 401 | 403 | 409 | 505 | 511),
            Self::Delete => matches!(status, 400 | 401 | 403 | 505 | 511),
        }
    }
}

/// 重试策略：最多 `retries` 次，第 n 次重试前等待 `base_delay * 2^n`（封顶 `max_delay`）
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Default::default()
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct HttpCoordinationClient {
    http: Client,
    base: Url,
    retry: RetryPolicy,
}

impl HttpCoordinationClient {
    pub fn new(base_url: &str, retry: RetryPolicy, request_timeout: Duration) -> Result<Self, VcError> {
        let base = Url::parse(base_url)
            .map_err(|e| VcError::invalid_config(format!("invalid API address '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(VcError::invalid_config(format!(
                "invalid API address '{base_url}'"
            )));
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| VcError::api(format!("failed to build HTTP client: {e}"), None))?;
        Ok(Self { http, base, retry })
    }

    /// 按 `[api]` 配置连接 `address` 上的 agent
    pub fn for_agent(address: &str, api: &ApiSection) -> Result<Self, VcError> {
        let retry = RetryPolicy {
            retries: api.retries,
            base_delay: Duration::from_millis(api.retry_base_ms),
            ..Default::default()
        };
        Self::new(
            &format!("http://{}:{}", address, api.port),
            retry,
            Duration::from_secs(api.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Result<Url, VcError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| VcError::invalid_config(format!("invalid API address '{}'", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn state_url(&self, key: &str) -> Result<Url, VcError> {
        self.url(&["api", "state", key])
    }

    /// 发送请求；连接失败与瞬时状态码重试，成功或非瞬时状态码原样返回响应
    async fn send<F>(&self, method: Method, build: F, ct: &CancellationToken) -> Result<Response, VcError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let kind = HttpMethodKind::of(&method);
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = ct.cancelled() => return Err(VcError::Cancelled),
                r = build().send() => r,
            };

            let error = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || kind.is_non_transient(status.as_u16()) {
                        return Ok(resp);
                    }
                    VcError::Api {
                        message: format!("{method} {} returned {status}", resp.url()),
                        status: Some(status.as_u16()),
                        reason: crate::core::ErrorReason::HttpNonSuccessResponse,
                    }
                }
                Err(e) => VcError::api(format!("{method} request failed: {e}"), e.status().map(|s| s.as_u16())),
            };

            if attempt >= self.retry.retries {
                return Err(error);
            }
            let delay = self.retry.delay_for(attempt);
            tracing::debug!(attempt = attempt + 1, "retrying coordination request in {:?}: {}", delay, error);
            attempt += 1;
            tokio::select! {
                _ = ct.cancelled() => return Err(VcError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 仅创建（`POST`）；已存在时返回 409 错误
    pub async fn create(&self, key: &str, state: Value, ct: &CancellationToken) -> Result<StateItem, VcError> {
        let url = self.state_url(key)?;
        let resp = self
            .send(Method::POST, || self.http.post(url.clone()).json(&state), ct)
            .await?;
        let resp = ensure_success(resp).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| VcError::api(format!("invalid state response: {e}"), None))?;
        Ok(StateItem::from_value(key, body))
    }

    /// 读取完整信封
    pub async fn get_item(&self, key: &str, ct: &CancellationToken) -> Result<Option<StateItem>, VcError> {
        let url = self.state_url(key)?;
        let resp = self.send(Method::GET, || self.http.get(url.clone()), ct).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| VcError::api(format!("invalid state response: {e}"), None))?;
        Ok(Some(StateItem::from_value(key, body)))
    }
}

async fn ensure_success(resp: Response) -> Result<Response, VcError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    Err(VcError::Api {
        message: format!("{url} returned {status}: {}", body.trim()),
        status: Some(status.as_u16()),
        reason: crate::core::ErrorReason::HttpNonSuccessResponse,
    })
}

#[async_trait]
impl CoordinationClient for HttpCoordinationClient {
    async fn publish(&self, key: &str, state: Value, ct: &CancellationToken) -> Result<(), VcError> {
        let url = self.state_url(key)?;
        let item = StateItem::new(key, state);
        let resp = self
            .send(Method::PUT, || self.http.put(url.clone()).json(&item), ct)
            .await?;
        ensure_success(resp).await?;
        tracing::debug!(key = %key, "state published");
        Ok(())
    }

    async fn try_get(&self, key: &str, ct: &CancellationToken) -> Result<Option<Value>, VcError> {
        Ok(self.get_item(key, ct).await?.map(|item| item.definition))
    }

    async fn delete(&self, key: &str, ct: &CancellationToken) -> Result<(), VcError> {
        let url = self.state_url(key)?;
        let resp = self.send(Method::DELETE, || self.http.delete(url.clone()), ct).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(resp).await.map(|_| ())
    }

    async fn is_online(&self, ct: &CancellationToken) -> bool {
        let Ok(url) = self.url(&["api", "heartbeat"]) else {
            return false;
        };
        tokio::select! {
            _ = ct.cancelled() => false,
            r = self.http.get(url).send() => r.is_ok_and(|resp| resp.status().is_success()),
        }
    }
}
