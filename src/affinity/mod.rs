//! CPU 亲和性规划
//!
//! 输入一组核心编号，输出两种形式：
//! - Windows：64 位掩码，`mask = OR(1 << core)`，编号 >= 64 不支持（单个处理器组上限）
//! - Linux：压缩区间串，连续段长度 >= 3 写作 `a-b`，长度 1～2 逐个列出，如 `0-2,5,7-9`
//!
//! Linux 新进程通过 `numactl -C <spec>` 前缀绑定，运行中进程通过 `taskset -a -p -c <spec> <pid>`；
//! Windows 运行中进程通过 PowerShell 设置 `ProcessorAffinity`。

use std::collections::BTreeSet;
use std::fmt;

use crate::core::{ErrorReason, VcError};
use crate::platform::OsPlatform;
use crate::process::{CommandSpec, OsProcess, ProcessHandle};

/// Linux 区间压缩的最短连续段
const MIN_RANGE_RUN: usize = 3;

/// 可接受的最大核心编号
const MAX_CORE_INDEX: i64 = u16::MAX as i64;

/// Windows 单个处理器组的核心数上限
const MAX_MASK_CORES: u32 = 64;

/// 有序、去重的核心编号集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityPlan {
    cores: Vec<u32>,
}

impl AffinityPlan {
    /// 空集合与负数编号被拒绝；重复编号静默去重，结果升序
    pub fn new<I>(cores: I) -> Result<Self, VcError>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut set = BTreeSet::new();
        for core in cores {
            if core < 0 {
                return Err(VcError::invalid_config(format!(
                    "core index {core} is invalid: core indices must be non-negative"
                )));
            }
            if core > MAX_CORE_INDEX {
                return Err(VcError::invalid_config(format!(
                    "core index {core} is out of range (maximum {MAX_CORE_INDEX})"
                )));
            }
            set.insert(core as u32);
        }
        if set.is_empty() {
            return Err(VcError::invalid_config(
                "at least one core index is required for an affinity plan",
            ));
        }
        Ok(Self {
            cores: set.into_iter().collect(),
        })
    }

    /// 解析 Linux 形式 `0-2,5,7-9`（也接受 `;` 分隔与空白）
    pub fn parse_spec(spec: &str) -> Result<Self, VcError> {
        let invalid = |part: &str| {
            VcError::invalid_config(format!("invalid core spec '{part}' in '{spec}'"))
        };
        let mut cores = Vec::new();
        for part in crate::profile::split_list(spec) {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start: i64 = start.trim().parse().map_err(|_| invalid(&part))?;
                    let end: i64 = end.trim().parse().map_err(|_| invalid(&part))?;
                    if start > end {
                        return Err(invalid(&part));
                    }
                    // 先检查上限再展开区间
                    if end > MAX_CORE_INDEX {
                        return Err(VcError::invalid_config(format!(
                            "core range '{part}' exceeds the maximum core index {MAX_CORE_INDEX}"
                        )));
                    }
                    cores.extend(start..=end);
                }
                None => cores.push(part.parse().map_err(|_| invalid(&part))?),
            }
        }
        Self::new(cores)
    }

    pub fn cores(&self) -> &[u32] {
        &self.cores
    }

    /// Windows 掩码；任一编号 >= 64 时返回 PlatformNotSupported
    pub fn windows_mask(&self) -> Result<u64, VcError> {
        if let Some(core) = self.cores.iter().find(|c| **c >= MAX_MASK_CORES) {
            return Err(VcError::PlatformNotSupported {
                message: format!(
                    "core index {core} exceeds the {MAX_MASK_CORES}-core limit of a single processor group"
                ),
                reason: ErrorReason::NotSupported,
            });
        }
        Ok(self.cores.iter().fold(0u64, |mask, c| mask | (1u64 << c)))
    }

    /// Linux 区间串
    pub fn linux_spec(&self) -> String {
        let mut parts = Vec::new();
        let mut i = 0;
        while i < self.cores.len() {
            let mut j = i;
            while j + 1 < self.cores.len() && self.cores[j + 1] == self.cores[j] + 1 {
                j += 1;
            }
            let run = j - i + 1;
            if run >= MIN_RANGE_RUN {
                parts.push(format!("{}-{}", self.cores[i], self.cores[j]));
            } else {
                parts.extend(self.cores[i..=j].iter().map(u32::to_string));
            }
            i = j + 1;
        }
        parts.join(",")
    }

    /// `numactl -C <spec> <command>`：以文本形式包装整行命令
    pub fn to_command_prefix(&self, command_line: &str) -> String {
        format!("numactl -C {} {}", self.linux_spec(), command_line.trim())
    }

    /// 以 numactl 包装待启动的命令
    pub fn wrap_command(&self, spec: CommandSpec) -> CommandSpec {
        spec.wrapped("numactl", vec!["-C".into(), self.linux_spec()])
    }

    /// 作用于运行中的进程：构造对应平台的绑定命令并同步执行
    pub async fn apply(&self, handle: &dyn ProcessHandle, platform: OsPlatform) -> Result<(), VcError> {
        let command = self.apply_command(handle, platform)?;
        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .output()
            .await
            .map_err(|e| VcError::workload(handle.name(), format!("failed to run '{command}': {e}")))?;
        if !output.status.success() {
            return Err(VcError::Workload {
                component: handle.name().to_string(),
                scenario: None,
                message: format!("'{command}' failed with {}", output.status),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                reason: ErrorReason::WorkloadFailed,
            });
        }
        tracing::info!(process = %handle.name(), cores = %self, "processor affinity applied");
        Ok(())
    }

    /// 绑定运行中进程所需的命令；已退出返回 InvalidOperation，非操作系统进程返回 NotSupported
    pub fn apply_command(&self, handle: &dyn ProcessHandle, platform: OsPlatform) -> Result<CommandSpec, VcError> {
        let process = handle.as_any().downcast_ref::<OsProcess>().ok_or_else(|| {
            VcError::NotSupported(format!(
                "process '{}' does not expose an operating-system process for affinity binding",
                handle.name()
            ))
        })?;
        if !process.is_started() || process.has_exited() {
            return Err(VcError::InvalidOperation(format!(
                "cannot apply processor affinity to process '{}': it is not running",
                handle.name()
            )));
        }
        let pid = process.pid().ok_or_else(|| {
            VcError::InvalidOperation(format!("process '{}' has no process id", handle.name()))
        })?;

        match platform {
            OsPlatform::Linux => Ok(CommandSpec::new("taskset").args([
                "-a".to_string(),
                "-p".to_string(),
                "-c".to_string(),
                self.linux_spec(),
                pid.to_string(),
            ])),
            OsPlatform::Windows => {
                let mask = self.windows_mask()?;
                Ok(CommandSpec::new("powershell").args([
                    "-NoProfile".to_string(),
                    "-Command".to_string(),
                    format!("(Get-Process -Id {pid}).ProcessorAffinity = {mask}"),
                ]))
            }
        }
    }
}

impl fmt::Display for AffinityPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.linux_spec())
    }
}
