//! 指标解析协作者
//!
//! 核心只通过 `parse(raw) -> Vec<Metric>` 调用解析器；解析器报告的格式错误被包装为
//! 结果解析失败（`VcError::WorkloadResults`），不改变编排器的控制流。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{ErrorReason, VcError};

/// 单个指标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            unit: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// 解析器报告的格式错误
#[derive(Debug, thiserror::Error)]
#[error("schema error: {0}")]
pub struct SchemaError(pub String);

pub trait MetricsParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Vec<Metric>, SchemaError>;
}

/// 调用解析器，格式错误转为结果解析失败
pub fn parse_results(
    parser: &dyn MetricsParser,
    component: &str,
    raw: &str,
) -> Result<Vec<Metric>, VcError> {
    if raw.trim().is_empty() {
        return Err(VcError::WorkloadResults {
            component: component.to_string(),
            message: "the workload produced no output to parse".into(),
            reason: ErrorReason::WorkloadResultsNotFound,
        });
    }
    parser.parse(raw).map_err(|e| VcError::WorkloadResults {
        component: component.to_string(),
        message: e.to_string(),
        reason: ErrorReason::WorkloadResultsParsingFailed,
    })
}

static KEY_VALUE_RE: OnceLock<Regex> = OnceLock::new();

/// 通用 `name: value [unit]` / `name=value [unit]` 行解析器
///
/// 面向输出简单的命令；每行至多一个指标，不匹配的行忽略，完全没有指标时报告格式错误。
#[derive(Debug, Clone, Default)]
pub struct KeyValueParser;

impl MetricsParser for KeyValueParser {
    fn parse(&self, raw: &str) -> Result<Vec<Metric>, SchemaError> {
        let re = KEY_VALUE_RE.get_or_init(|| {
            Regex::new(r"^\s*([A-Za-z][\w .\-/]*?)\s*[:=]\s*(-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)\s*([A-Za-z%/]+)?\s*$")
                .unwrap()
        });
        let metrics: Vec<Metric> = raw
            .lines()
            .filter_map(|line| re.captures(line))
            .filter_map(|caps| {
                let value: f64 = caps[2].parse().ok()?;
                let mut metric = Metric::new(caps[1].trim(), value);
                metric.unit = caps.get(3).map(|m| m.as_str().to_string());
                Some(metric)
            })
            .collect();
        if metrics.is_empty() {
            return Err(SchemaError("no 'name: value' metrics found in output".into()));
        }
        Ok(metrics)
    }
}
