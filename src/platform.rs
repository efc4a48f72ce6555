//! 平台识别：操作系统 + CPU 架构
//!
//! 组件通过 `linux-x64`、`win-arm64` 这类名称声明支持的平台，编排器在 Initialize 之前检查。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{ErrorReason, VcError};

/// 操作系统
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsPlatform {
    Linux,
    Windows,
}

/// CPU 架构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuArchitecture {
    X64,
    Arm64,
}

/// (OS, 架构) 组合，文本形式为 `linux-x64` / `win-arm64`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformArchitecture {
    pub os: OsPlatform,
    pub arch: CpuArchitecture,
}

impl PlatformArchitecture {
    pub const LINUX_X64: Self = Self::new(OsPlatform::Linux, CpuArchitecture::X64);
    pub const LINUX_ARM64: Self = Self::new(OsPlatform::Linux, CpuArchitecture::Arm64);
    pub const WIN_X64: Self = Self::new(OsPlatform::Windows, CpuArchitecture::X64);
    pub const WIN_ARM64: Self = Self::new(OsPlatform::Windows, CpuArchitecture::Arm64);

    pub const fn new(os: OsPlatform, arch: CpuArchitecture) -> Self {
        Self { os, arch }
    }

    /// 当前进程运行的平台；不支持的 OS/架构返回 PlatformNotSupported
    pub fn current() -> Result<Self, VcError> {
        let os = match std::env::consts::OS {
            "linux" => OsPlatform::Linux,
            "windows" => OsPlatform::Windows,
            other => {
                return Err(VcError::platform_not_supported(format!(
                    "operating system '{other}' is not supported"
                )))
            }
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => CpuArchitecture::X64,
            "aarch64" => CpuArchitecture::Arm64,
            other => {
                return Err(VcError::PlatformNotSupported {
                    message: format!("CPU architecture '{other}' is not supported"),
                    reason: ErrorReason::ProcessorArchitectureNotSupported,
                })
            }
        };
        Ok(Self { os, arch })
    }

    pub fn is_unix(&self) -> bool {
        self.os == OsPlatform::Linux
    }
}

impl fmt::Display for PlatformArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = match self.os {
            OsPlatform::Linux => "linux",
            OsPlatform::Windows => "win",
        };
        let arch = match self.arch {
            CpuArchitecture::X64 => "x64",
            CpuArchitecture::Arm64 => "arm64",
        };
        write!(f, "{os}-{arch}")
    }
}

impl FromStr for PlatformArchitecture {
    type Err = VcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linux-x64" => Ok(Self::LINUX_X64),
            "linux-arm64" => Ok(Self::LINUX_ARM64),
            "win-x64" => Ok(Self::WIN_X64),
            "win-arm64" => Ok(Self::WIN_ARM64),
            other => Err(VcError::invalid_config(format!(
                "unknown platform/architecture '{other}' (expected e.g. linux-x64, win-arm64)"
            ))),
        }
    }
}

/// 解析逗号/分号分隔的平台列表
pub fn parse_platform_list(raw: &str) -> Result<Vec<PlatformArchitecture>, VcError> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_display_roundtrip() {
        for p in [
            PlatformArchitecture::LINUX_X64,
            PlatformArchitecture::LINUX_ARM64,
            PlatformArchitecture::WIN_X64,
            PlatformArchitecture::WIN_ARM64,
        ] {
            assert_eq!(p.to_string().parse::<PlatformArchitecture>().unwrap(), p);
        }
    }

    #[test]
    fn test_parse_platform_list() {
        let list = parse_platform_list("linux-x64, WIN-ARM64;").unwrap();
        assert_eq!(
            list,
            vec![PlatformArchitecture::LINUX_X64, PlatformArchitecture::WIN_ARM64]
        );
        assert!(parse_platform_list("mac-x64").is_err());
    }
}
