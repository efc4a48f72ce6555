//! 跨角色握手的基本组件：发布 / 等待 / 删除协调状态
//!
//! `TargetRole` 指定读写哪个角色的协调 API，缺省为本机 API。
//! 典型用法：Server 在准备好资源后 `PublishState`，Client 在启动负载前 `WaitForState`。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::Component;
use crate::coordination::CoordinationClientExt;
use crate::core::{RunContext, VcError};
use crate::profile::{parse_timespan, ComponentDescriptor, Parameters};

/// 等待的默认上限
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// 组件控制参数，不进入发布的状态体
const RESERVED_PARAMETERS: &[&str] = &[
    "Key",
    "State",
    "TargetRole",
    "Scenario",
    "Role",
    "Optional",
    "FailFast",
    "SupportedPlatforms",
];

fn require_key(params: &Parameters) -> Result<String, VcError> {
    params.require_string("Key")
}

fn parse_json_param(params: &Parameters, key: &str) -> Result<Option<Value>, VcError> {
    params
        .get_string(key)
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| VcError::invalid_config(format!("parameter '{key}' is not valid JSON: {e}")))
        })
        .transpose()
}

/// `actual` 是否包含 `expected` 的全部属性（对象递归比较，键名忽略大小写；其它值要求相等）
pub fn state_matches(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected.iter().all(|(key, want)| {
            actual
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .is_some_and(|(_, have)| state_matches(have, want))
        }),
        _ => actual == expected,
    }
}

pub struct PublishState {
    descriptor: ComponentDescriptor,
    key: String,
    state: Value,
    target_role: Option<String>,
}

impl PublishState {
    /// 状态体取 `State`（JSON）参数，未提供时由其余非控制参数组成
    pub fn new(descriptor: ComponentDescriptor) -> Result<Self, VcError> {
        let params = &descriptor.parameters;
        let key = require_key(params)?;
        let state = match parse_json_param(params, "State")? {
            Some(state) => state,
            None => {
                let mut body = Map::new();
                for (name, value) in params.iter() {
                    if RESERVED_PARAMETERS.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                        continue;
                    }
                    body.insert(name.clone(), serde_json::to_value(value)?);
                }
                Value::Object(body)
            }
        };
        let target_role = params.get_string("TargetRole");
        Ok(Self {
            descriptor,
            key,
            state,
            target_role,
        })
    }

    pub fn state(&self) -> &Value {
        &self.state
    }
}

#[async_trait]
impl Component for PublishState {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError> {
        let api = ctx.api_for_role(self.target_role.as_deref())?;
        api.publish(&self.key, self.state.clone(), ct).await?;
        tracing::info!(key = %self.key, target_role = ?self.target_role, "state published");
        Ok(())
    }
}

/// `WaitForState` 的强类型配置
#[derive(Debug, Clone, PartialEq)]
pub struct WaitForStateConfig {
    pub key: String,
    pub target_role: Option<String>,
    /// 期望状态包含的属性；未指定时只要求状态存在
    pub expected: Option<Value>,
    pub timeout: Duration,
    /// 未指定时使用运行配置的轮询间隔
    pub poll_interval: Option<Duration>,
}

impl WaitForStateConfig {
    pub fn from_parameters(params: &Parameters) -> Result<Self, VcError> {
        let span = |key: &str| params.get_string(key).map(|raw| parse_timespan(&raw)).transpose();
        Ok(Self {
            key: require_key(params)?,
            target_role: params.get_string("TargetRole"),
            expected: parse_json_param(params, "ExpectedState")?,
            timeout: span("Timeout")?.unwrap_or(DEFAULT_WAIT_TIMEOUT),
            poll_interval: span("PollingInterval")?,
        })
    }
}

pub struct WaitForState {
    descriptor: ComponentDescriptor,
    config: WaitForStateConfig,
}

impl WaitForState {
    pub fn new(descriptor: ComponentDescriptor) -> Result<Self, VcError> {
        let config = WaitForStateConfig::from_parameters(&descriptor.parameters)?;
        Ok(Self { descriptor, config })
    }
}

#[async_trait]
impl Component for WaitForState {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError> {
        let api = ctx.api_for_role(self.config.target_role.as_deref())?;
        let interval = self.config.poll_interval.unwrap_or(ctx.poll_interval);
        let expected = self.config.expected.clone();
        tracing::info!(
            key = %self.config.key,
            target_role = ?self.config.target_role,
            timeout_secs = self.config.timeout.as_secs(),
            "waiting for state"
        );

        api.wait_for(
            &self.config.key,
            move |state| expected.as_ref().map_or(true, |e| state_matches(state, e)),
            interval,
            self.config.timeout,
            ct,
        )
        .await?;
        tracing::info!(key = %self.config.key, "state condition met");
        Ok(())
    }
}

pub struct DeleteState {
    descriptor: ComponentDescriptor,
    key: String,
    target_role: Option<String>,
}

impl DeleteState {
    pub fn new(descriptor: ComponentDescriptor) -> Result<Self, VcError> {
        let key = require_key(&descriptor.parameters)?;
        let target_role = descriptor.parameters.get_string("TargetRole");
        Ok(Self {
            descriptor,
            key,
            target_role,
        })
    }
}

#[async_trait]
impl Component for DeleteState {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError> {
        let api = ctx.api_for_role(self.target_role.as_deref())?;
        api.delete(&self.key, ct).await?;
        tracing::info!(key = %self.key, "state deleted");
        Ok(())
    }
}
