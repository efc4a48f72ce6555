//! 命令执行组件
//!
//! `ExecuteCommand`：执行一条或多条（`&&` 连接）命令，可选提权、成功退出码、核心绑定、
//! 依赖包（工作目录相对包目录解析）与失败重试；可选把 stdout 交给指标解析器。
//! `ExecuteCommandMonitor`：预热后按固定频率执行命令，直到运行结束。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Component;
use crate::affinity::AffinityPlan;
use crate::core::{RunContext, VcError};
use crate::parsers::{parse_results, KeyValueParser};
use crate::platform::OsPlatform;
use crate::process::{CommandSpec, Elevation, ExitCodePolicy, OsProcess, ProcessHandle};
use crate::profile::{parse_timespan, ComponentDescriptor, Parameters};

const DEFAULT_PSEXEC: &str = "PsExec.exe";
const DEFAULT_MONITOR_FREQUENCY: Duration = Duration::from_secs(60);

/// `ExecuteCommand` 的强类型配置
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteCommandConfig {
    /// 依次执行，任一失败即停止
    pub commands: Vec<CommandSpec>,
    pub working_dir: Option<PathBuf>,
    pub elevation: Elevation,
    pub success: ExitCodePolicy,
    pub affinity: Option<AffinityPlan>,
    /// 运行前要求已安装的包；相对工作目录按该包目录解析
    pub package: Option<String>,
    pub max_retries: u32,
    /// 用通用 `name: value` 解析器从 stdout 提取指标
    pub capture_metrics: bool,
}

impl ExecuteCommandConfig {
    pub fn from_parameters(params: &Parameters) -> Result<Self, VcError> {
        let command_line = params
            .get_string("Command")
            .or_else(|| params.get_string("CommandLine"))
            .ok_or_else(|| VcError::invalid_config("required parameter 'Command' is not defined"))?;

        let mut commands = split_chain(&command_line)
            .iter()
            .map(|c| CommandSpec::parse(c))
            .collect::<Result<Vec<_>, _>>()?;
        if commands.is_empty() {
            return Err(VcError::invalid_config("parameter 'Command' does not contain a command"));
        }
        if let Some(arguments) = params.get_string("Arguments") {
            if commands.len() > 1 {
                return Err(VcError::invalid_config(
                    "'Arguments' cannot be combined with a chained ('&&') command",
                ));
            }
            let extra = crate::process::split_command_line(&arguments)?;
            let last = commands.remove(0);
            commands.push(last.args(extra));
        }

        let max_retries = params.get_i64("MaxRetries")?.unwrap_or(0);
        let max_retries = u32::try_from(max_retries)
            .map_err(|_| VcError::invalid_config(format!("'MaxRetries' must be non-negative (value: {max_retries})")))?;

        Ok(Self {
            commands,
            working_dir: params.get_string("WorkingDirectory").map(PathBuf::from),
            elevation: elevation_from(params)?,
            success: match params.get_string("SuccessExitCodes") {
                Some(raw) => ExitCodePolicy::parse(&raw)?,
                None => ExitCodePolicy::default(),
            },
            affinity: params
                .get_string("CoreAffinity")
                .map(|raw| AffinityPlan::parse_spec(&raw))
                .transpose()?,
            package: params.get_string("PackageName"),
            max_retries,
            capture_metrics: params.bool_or("CaptureMetrics", false)?,
        })
    }
}

/// 按引号外的 `&&` 切分命令链，去掉空段
fn split_chain(raw: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '&' && chars.peek() == Some(&'&') => {
                chars.next();
                commands.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    commands.push(current);
    commands
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// `Elevated` / `RunAsUser` / `InteractiveSession` + `PsExecPath`
fn elevation_from(params: &Parameters) -> Result<Elevation, VcError> {
    if let Some(session) = params.get_i64("InteractiveSession")? {
        let session = u32::try_from(session).map_err(|_| {
            VcError::invalid_config(format!("'InteractiveSession' must be non-negative (value: {session})"))
        })?;
        let psexec = params
            .get_string("PsExecPath")
            .unwrap_or_else(|| DEFAULT_PSEXEC.to_string());
        return Ok(Elevation::InteractiveSession {
            session,
            psexec: PathBuf::from(psexec),
        });
    }
    let user = params.get_string("RunAsUser");
    if user.is_some() {
        return Ok(Elevation::Elevated { user });
    }
    Ok(Elevation::from_flag(params.bool_or("Elevated", false)?))
}

/// 相对工作目录以包目录为基准；未指定时使用包目录
fn resolve_working_dir(configured: Option<&Path>, package_dir: Option<&Path>) -> Option<PathBuf> {
    match (configured, package_dir) {
        (Some(dir), Some(base)) if dir.is_relative() => Some(base.join(dir)),
        (Some(dir), _) => Some(dir.to_path_buf()),
        (None, Some(base)) => Some(base.to_path_buf()),
        (None, None) => None,
    }
}

/// 启动一次命令并按退出码策略评估；Windows 下核心绑定在启动后作用于运行中的进程
async fn run_command(
    ctx: &RunContext,
    name: &str,
    spec: CommandSpec,
    elevation: &Elevation,
    affinity: Option<&AffinityPlan>,
    success: &ExitCodePolicy,
    ct: &CancellationToken,
) -> Result<std::sync::Arc<OsProcess>, VcError> {
    let spec = match affinity {
        Some(plan) if ctx.platform.os == OsPlatform::Linux => plan.wrap_command(spec),
        _ => spec,
    };
    let process = ctx.supervisor.create_with(name, spec, elevation)?;
    tracing::info!(component = %name, command = %process.spec(), "executing command");

    let outcome = match affinity {
        Some(plan) if ctx.platform.os == OsPlatform::Windows => {
            if ct.is_cancelled() {
                return Err(VcError::Cancelled);
            }
            process.start()?;
            if let Err(e) = plan.apply(&*process, OsPlatform::Windows).await {
                ctx.supervisor.kill(&process);
                return Err(e);
            }
            ctx.supervisor.wait_for_exit(&process, ct).await?
        }
        _ => ctx.supervisor.start_and_wait(&process, ct).await?,
    };

    let code = success.evaluate(&process, outcome)?;
    tracing::debug!(component = %name, pid = ?process.pid(), exit_code = code, "command completed");
    Ok(process)
}

pub struct ExecuteCommand {
    descriptor: ComponentDescriptor,
    config: ExecuteCommandConfig,
}

impl ExecuteCommand {
    pub fn new(descriptor: ComponentDescriptor) -> Result<Self, VcError> {
        let config = ExecuteCommandConfig::from_parameters(&descriptor.parameters)?;
        Ok(Self { descriptor, config })
    }

    pub fn config(&self) -> &ExecuteCommandConfig {
        &self.config
    }

    fn report_metrics(&self, stdout: &str) {
        let name = self.descriptor.display_name();
        match parse_results(&KeyValueParser, &name, stdout) {
            Ok(metrics) => {
                for m in metrics {
                    tracing::info!(
                        component = %name,
                        metric = %m.name,
                        value = m.value,
                        unit = m.unit.as_deref().unwrap_or(""),
                        "metric captured"
                    );
                }
            }
            Err(e) => tracing::warn!(component = %name, reason = e.reason().code(), "{}", e),
        }
    }
}

#[async_trait]
impl Component for ExecuteCommand {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    async fn initialize(&self, ctx: &RunContext, _ct: &CancellationToken) -> Result<(), VcError> {
        if let Some(package) = &self.config.package {
            ctx.packages.require_package(package).await?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError> {
        let package_dir = match &self.config.package {
            Some(name) => Some(ctx.packages.require_package(name).await?.platform_path(&ctx.platform)),
            None => None,
        };
        let working_dir = resolve_working_dir(self.config.working_dir.as_deref(), package_dir.as_deref());
        let name = self.descriptor.display_name();

        for command in &self.config.commands {
            let mut spec = command.clone();
            if let Some(dir) = &working_dir {
                spec.working_dir = Some(dir.clone());
            }

            let mut attempt = 0;
            loop {
                let result = run_command(
                    ctx,
                    &name,
                    spec.clone(),
                    &self.config.elevation,
                    self.config.affinity.as_ref(),
                    &self.config.success,
                    ct,
                )
                .await;
                match result {
                    Ok(process) => {
                        if self.config.capture_metrics {
                            self.report_metrics(&process.stdout());
                        }
                        break;
                    }
                    Err(e) if !e.is_cancelled() && !e.aborts_run() && attempt < self.config.max_retries => {
                        attempt += 1;
                        tracing::warn!(component = %name, attempt, "command failed, retrying: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

/// `ExecuteCommandMonitor` 的强类型配置
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub command: ExecuteCommandConfig,
    /// 两次执行之间的间隔（`MonitorFrequency`）
    pub frequency: Duration,
    /// 首次执行前的等待（`MonitorWarmupPeriod`）
    pub warmup: Duration,
}

impl MonitorConfig {
    pub fn from_parameters(params: &Parameters) -> Result<Self, VcError> {
        let span = |key: &str| params.get_string(key).map(|raw| parse_timespan(&raw)).transpose();
        Ok(Self {
            command: ExecuteCommandConfig::from_parameters(params)?,
            frequency: span("MonitorFrequency")?.unwrap_or(DEFAULT_MONITOR_FREQUENCY),
            warmup: span("MonitorWarmupPeriod")?.unwrap_or(Duration::ZERO),
        })
    }
}

pub struct ExecuteCommandMonitor {
    descriptor: ComponentDescriptor,
    config: MonitorConfig,
}

impl ExecuteCommandMonitor {
    pub fn new(descriptor: ComponentDescriptor) -> Result<Self, VcError> {
        let config = MonitorConfig::from_parameters(&descriptor.parameters)?;
        Ok(Self { descriptor, config })
    }

    async fn run_once(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError> {
        let name = self.descriptor.display_name();
        for command in &self.config.command.commands {
            let mut spec = command.clone();
            spec.working_dir = self.config.command.working_dir.clone();
            run_command(
                ctx,
                &name,
                spec,
                &self.config.command.elevation,
                self.config.command.affinity.as_ref(),
                &self.config.command.success,
                ct,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Component for ExecuteCommandMonitor {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError> {
        let name = self.descriptor.display_name();
        tokio::select! {
            _ = tokio::time::sleep(self.config.warmup) => {}
            _ = ct.cancelled() => return Ok(()),
        }

        loop {
            match self.run_once(ctx, ct).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Ok(()),
                Err(e) => tracing::warn!(component = %name, "monitor command failed: {}", e),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.frequency) => {}
                _ = ct.cancelled() => return Ok(()),
            }
        }
    }
}
