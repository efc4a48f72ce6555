//! 错误分类与错误原因码
//!
//! `VcError` 的每个变体对应一种错误种类（布局、依赖缺失、平台不支持、负载失败……），
//! 并携带一个数值化的 `ErrorReason`：`< 400` 视为瞬时，`400..500` 严重但可在后续迭代重试，
//! `>= 500` 为终止性错误，编排器遇到即中止整个运行。

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// 错误原因码（数值越大越严重）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ErrorReason {
    Undefined = 0,
    WorkloadResultsNotFound = 314,
    WorkloadFailed = 315,
    WorkloadResultsParsingFailed = 316,
    MonitorFailed = 318,
    HttpNonSuccessResponse = 320,
    ApiStatePollingTimeout = 410,
    ApiRequestFailed = 411,
    WorkloadUnexpectedAnomaly = 430,
    InvalidProfileDefinition = 501,
    NotSupported = 502,
    PlatformNotSupported = 503,
    ProcessorArchitectureNotSupported = 504,
    DependencyInstallationFailed = 506,
    DependencyNotFound = 507,
    InstructionsNotValid = 510,
    WorkloadDependencyMissing = 526,
    CriticalWorkloadFailure = 527,
    EnvironmentLayoutNotDefined = 550,
    LayoutInvalid = 551,
}

impl ErrorReason {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// >= 500：无论重试多少次都不可能成功
    pub fn is_terminal(self) -> bool {
        self.code() >= 500
    }
}

/// 核心库统一错误类型
#[derive(Error, Debug)]
pub enum VcError {
    #[error("Layout error: {message}")]
    Layout { message: String, reason: ErrorReason },

    #[error("Dependency missing: {message}")]
    DependencyMissing { message: String, reason: ErrorReason },

    #[error("Platform not supported: {message}")]
    PlatformNotSupported { message: String, reason: ErrorReason },

    #[error("Workload '{component}' failed{}: {message}", scenario_suffix(.scenario))]
    Workload {
        component: String,
        scenario: Option<String>,
        message: String,
        exit_code: Option<i32>,
        stderr: String,
        reason: ErrorReason,
    },

    #[error("Workload results for '{component}' could not be captured: {message}")]
    WorkloadResults {
        component: String,
        message: String,
        reason: ErrorReason,
    },

    #[error("Timed out after {waited:?} waiting for state '{key}'")]
    Timeout { key: String, waited: Duration },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String, reason: ErrorReason },

    #[error("API request failed{}: {message}", status_suffix(.status))]
    Api {
        message: String,
        status: Option<u16>,
        reason: ErrorReason,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn scenario_suffix(scenario: &Option<String>) -> String {
    scenario
        .as_deref()
        .map(|s| format!(" (scenario '{s}')"))
        .unwrap_or_default()
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl VcError {
    pub fn layout(message: impl Into<String>) -> Self {
        Self::Layout {
            message: message.into(),
            reason: ErrorReason::LayoutInvalid,
        }
    }

    pub fn dependency_missing(message: impl Into<String>) -> Self {
        Self::DependencyMissing {
            message: message.into(),
            reason: ErrorReason::DependencyNotFound,
        }
    }

    pub fn platform_not_supported(message: impl Into<String>) -> Self {
        Self::PlatformNotSupported {
            message: message.into(),
            reason: ErrorReason::PlatformNotSupported,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            reason: ErrorReason::InstructionsNotValid,
        }
    }

    /// Profile 定义本身有误（如引用了不存在的参数）
    pub fn schema(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            reason: ErrorReason::InvalidProfileDefinition,
        }
    }

    pub fn workload(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Workload {
            component: component.into(),
            scenario: None,
            message: message.into(),
            exit_code: None,
            stderr: String::new(),
            reason: ErrorReason::WorkloadFailed,
        }
    }

    pub fn api(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Api {
            message: message.into(),
            status,
            reason: ErrorReason::ApiRequestFailed,
        }
    }

    /// 错误原因码；无显式原因的变体按其语义归类
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::Layout { reason, .. }
            | Self::DependencyMissing { reason, .. }
            | Self::PlatformNotSupported { reason, .. }
            | Self::Workload { reason, .. }
            | Self::WorkloadResults { reason, .. }
            | Self::InvalidConfiguration { reason, .. }
            | Self::Api { reason, .. } => *reason,
            Self::Timeout { .. } => ErrorReason::ApiStatePollingTimeout,
            Self::NotSupported(_) => ErrorReason::NotSupported,
            Self::Cancelled | Self::InvalidOperation(_) | Self::Io(_) | Self::Json(_) => {
                ErrorReason::Undefined
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.reason().is_terminal()
    }

    /// 依赖缺失与布局错误总是向上传播并中止运行
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            Self::DependencyMissing { .. } | Self::Layout { .. }
        ) || self.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// 为负载错误补全组件名与场景（已有值不覆盖）
    pub fn with_component(mut self, name: &str, scenario: Option<&str>) -> Self {
        match &mut self {
            Self::Workload {
                component,
                scenario: sc,
                ..
            } => {
                if component.is_empty() {
                    *component = name.to_string();
                }
                if sc.is_none() {
                    *sc = scenario.map(str::to_string);
                }
            }
            Self::WorkloadResults { component, .. } if component.is_empty() => {
                *component = name.to_string();
            }
            _ => {}
        }
        self
    }
}
