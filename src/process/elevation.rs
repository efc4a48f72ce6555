//! 提权包装
//!
//! Unix：`sudo [-u <user>] <program> <args>`；命令本身已是 sudo、当前已是 root 或关闭了 sudo 包装时原样执行。
//! Windows：agent 自身以管理员运行，提权命令直接启动；需要进入某个交互式会话（GUI 负载）时
//! 经 PsExec 包装：`PsExec -accepteula -s -i <session> -w <dir> <program> <args>`。

use std::path::PathBuf;

use super::command::CommandSpec;
use crate::core::VcError;
use crate::platform::OsPlatform;

/// 调用方请求的提权方式
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Elevation {
    #[default]
    None,
    /// 以超级用户（或指定用户）运行
    Elevated { user: Option<String> },
    /// Windows：以 SYSTEM 身份在指定交互式会话中运行
    InteractiveSession { session: u32, psexec: PathBuf },
}

impl Elevation {
    pub fn from_flag(elevated: bool) -> Self {
        if elevated {
            Self::Elevated { user: None }
        } else {
            Self::None
        }
    }

    pub fn is_elevated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// 本机提权环境
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElevationContext {
    pub platform: OsPlatform,
    /// 关闭后 Unix 下不再插入 sudo
    pub use_sudo: bool,
    pub running_as_root: bool,
}

impl ElevationContext {
    pub fn detect(platform: OsPlatform, use_sudo: bool) -> Self {
        Self {
            platform,
            use_sudo,
            running_as_root: platform == OsPlatform::Linux && running_as_root(),
        }
    }
}

/// 按平台把提权请求落实为具体命令
pub fn apply_elevation(
    spec: CommandSpec,
    elevation: &Elevation,
    ctx: &ElevationContext,
) -> Result<CommandSpec, VcError> {
    match (ctx.platform, elevation) {
        (_, Elevation::None) => Ok(spec),

        (OsPlatform::Linux, Elevation::Elevated { user }) => {
            if spec.program_name() == "sudo" || !ctx.use_sudo {
                return Ok(spec);
            }
            match user {
                Some(user) => Ok(spec.wrapped("sudo", vec!["-u".into(), user.clone()])),
                None if ctx.running_as_root => Ok(spec),
                None => Ok(spec.wrapped("sudo", vec![])),
            }
        }
        (OsPlatform::Linux, Elevation::InteractiveSession { .. }) => Err(VcError::NotSupported(
            "interactive session elevation is only supported on Windows".into(),
        )),

        (OsPlatform::Windows, Elevation::Elevated { user: None }) => Ok(spec),
        (OsPlatform::Windows, Elevation::Elevated { user: Some(user) }) => {
            Err(VcError::NotSupported(format!(
                "running elevated as user '{user}' is not supported on Windows"
            )))
        }
        (OsPlatform::Windows, Elevation::InteractiveSession { session, psexec }) => {
            let dir = spec
                .working_dir
                .clone()
                .or_else(|| psexec.parent().map(|p| p.to_path_buf()))
                .unwrap_or_else(|| PathBuf::from("."));
            let wrapper_args = vec![
                "-accepteula".into(),
                "-s".into(),
                "-i".into(),
                session.to_string(),
                "-w".into(),
                dir.display().to_string(),
            ];
            Ok(spec.wrapped(psexec.display().to_string(), wrapper_args))
        }
    }
}

#[cfg(unix)]
fn running_as_root() -> bool {
    std::process::Command::new("id")
        .arg("-u")
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}
