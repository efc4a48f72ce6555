//! 退出码策略：调用方给出「成功」退出码集合，其余转为负载失败错误

use super::handle::{OsProcess, ProcessHandle};
use super::supervisor::ProcessOutcome;
use crate::core::{ErrorReason, VcError};

/// 默认成功退出码
pub const DEFAULT_SUCCESS_CODES: &[i32] = &[0];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitCodePolicy {
    success_codes: Vec<i32>,
}

impl Default for ExitCodePolicy {
    fn default() -> Self {
        Self {
            success_codes: DEFAULT_SUCCESS_CODES.to_vec(),
        }
    }
}

impl ExitCodePolicy {
    /// 空集合退化为默认 `{0}`
    pub fn new(codes: impl IntoIterator<Item = i32>) -> Self {
        let mut success_codes: Vec<i32> = codes.into_iter().collect();
        success_codes.sort_unstable();
        success_codes.dedup();
        if success_codes.is_empty() {
            return Self::default();
        }
        Self { success_codes }
    }

    /// 从 `0,3010` 这类列表解析
    pub fn parse(raw: &str) -> Result<Self, VcError> {
        let codes = crate::profile::split_list(raw)
            .iter()
            .map(|s| {
                s.parse::<i32>().map_err(|_| {
                    VcError::invalid_config(format!("'{s}' is not a valid exit code"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(codes))
    }

    pub fn success_codes(&self) -> &[i32] {
        &self.success_codes
    }

    pub fn is_success(&self, code: i32) -> bool {
        self.success_codes.contains(&code)
    }

    /// 评估一次执行结果；非成功退出码返回携带 stderr 的 `VcError::Workload`
    pub fn evaluate(&self, process: &OsProcess, outcome: ProcessOutcome) -> Result<i32, VcError> {
        match outcome {
            ProcessOutcome::Cancelled => Err(VcError::Cancelled),
            ProcessOutcome::Exited(Some(code)) if self.is_success(code) => Ok(code),
            ProcessOutcome::Exited(code) => {
                let stderr = process.stderr();
                let message = match code {
                    Some(c) => format!("'{}' exited with code {c}", process.spec()),
                    None => format!("'{}' was terminated by a signal", process.spec()),
                };
                Err(VcError::Workload {
                    component: process.name().to_string(),
                    scenario: None,
                    message: if stderr.trim().is_empty() {
                        message
                    } else {
                        format!("{message}: {}", last_lines(&stderr, 20))
                    },
                    exit_code: code,
                    stderr,
                    reason: ErrorReason::WorkloadFailed,
                })
            }
        }
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
