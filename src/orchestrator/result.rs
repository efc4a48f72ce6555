//! 运行结果：每个组件的结局、完成的迭代数、被记录但未中止运行的失败

use std::time::Duration;

use serde::Serialize;

use crate::core::{ErrorReason, VcError};
use crate::profile::ComponentKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ComponentOutcome {
    Succeeded,
    Skipped { reason: String },
    Failed { reason: ErrorReason, message: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    pub component: String,
    pub kind: ComponentKind,
    /// 动作所在的迭代（从 1 开始）；依赖与监视器为 None
    pub iteration: Option<u64>,
    #[serde(flatten)]
    pub outcome: ComponentOutcome,
}

/// 被记录但没有中止运行的失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub component: String,
    pub reason: ErrorReason,
    pub message: String,
}

impl RunFailure {
    pub fn from_error(component: &str, err: &VcError) -> Self {
        Self {
            component: component.to_string(),
            reason: err.reason(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub records: Vec<ComponentRecord>,
    /// 已结束的迭代数（含因非致命失败提前结束的迭代，不含被取消的迭代）
    pub iterations: u64,
    pub failures: Vec<RunFailure>,
    /// 外部取消了运行
    pub cancelled: bool,
    pub dependencies_only: bool,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }

    pub(crate) fn record(
        &mut self,
        component: &str,
        kind: ComponentKind,
        iteration: Option<u64>,
        outcome: ComponentOutcome,
    ) {
        self.records.push(ComponentRecord {
            component: component.to_string(),
            kind,
            iteration,
            outcome,
        });
    }

    /// 记录失败：组件结局与失败列表各一条
    pub(crate) fn record_failure(
        &mut self,
        component: &str,
        kind: ComponentKind,
        iteration: Option<u64>,
        err: &VcError,
    ) {
        self.record(
            component,
            kind,
            iteration,
            ComponentOutcome::Failed {
                reason: err.reason(),
                message: err.to_string(),
            },
        );
        self.failures.push(RunFailure::from_error(component, err));
    }

    /// 指定组件的所有记录
    pub fn outcomes_for<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a ComponentOutcome> + 'a {
        self.records
            .iter()
            .filter(move |r| r.component.eq_ignore_ascii_case(component))
            .map(|r| &r.outcome)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_recording() {
        let mut result = RunResult::default();
        result.record("Redis", ComponentKind::Action, Some(1), ComponentOutcome::Succeeded);
        assert!(result.succeeded());

        let err = VcError::workload("fio", "exit code 1");
        result.record_failure("fio", ComponentKind::Action, Some(1), &err);
        assert!(!result.succeeded());
        assert_eq!(result.failures[0].reason, ErrorReason::WorkloadFailed);
        assert_eq!(result.outcomes_for("FIO").count(), 1);
    }

    #[test]
    fn test_serializes_outcome_inline() {
        let mut result = RunResult::default();
        result.record(
            "DependencyPackage",
            ComponentKind::Dependency,
            None,
            ComponentOutcome::Skipped {
                reason: "already completed".into(),
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["records"][0]["outcome"], "skipped");
        assert_eq!(json["records"][0]["reason"], "already completed");
    }
}
