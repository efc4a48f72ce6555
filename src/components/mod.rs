//! 组件：Profile 中每个 Dependency / Action / Monitor 元素在运行期的实例
//!
//! 组件在构造时把参数表一次性解析为自己的强类型配置，之后只读取该配置，
//! 只通过运行上下文访问状态存储、协调 API、包管理器与进程监管器。
//! 生命周期：`initialize` → `execute` → `cleanup`，`cleanup` 无论成败都会被调用。

pub mod command;
pub mod composite;
pub mod package;
pub mod registry;
pub mod state;

pub use command::{ExecuteCommand, ExecuteCommandConfig, ExecuteCommandMonitor, MonitorConfig};
pub use composite::{ParallelExecution, SequentialExecution};
pub use package::DependencyPackage;
pub use registry::{ComponentFactory, ComponentRegistry};
pub use state::{DeleteState, PublishState, WaitForState, WaitForStateConfig};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{RunContext, VcError};
use crate::platform::PlatformArchitecture;
use crate::profile::ComponentDescriptor;

/// 组件生命周期接口
#[async_trait]
pub trait Component: Send + Sync {
    /// 构造该组件的描述
    fn descriptor(&self) -> &ComponentDescriptor;

    fn name(&self) -> String {
        self.descriptor().display_name()
    }

    /// 组件自身声明支持的平台；为空表示不限。Profile 中的 `SupportedPlatforms` 参数优先
    fn supported_platforms(&self) -> Vec<PlatformArchitecture> {
        Vec::new()
    }

    async fn initialize(&self, _ctx: &RunContext, _ct: &CancellationToken) -> Result<(), VcError> {
        Ok(())
    }

    async fn execute(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError>;

    async fn cleanup(&self, _ctx: &RunContext) -> Result<(), VcError> {
        Ok(())
    }
}

/// 组件在 `platform` 上是否可运行
pub fn is_supported_on(component: &dyn Component, platform: &PlatformArchitecture) -> Result<bool, VcError> {
    let declared = component.descriptor().supported_platforms()?;
    let platforms = if declared.is_empty() {
        component.supported_platforms()
    } else {
        declared
    };
    Ok(platforms.is_empty() || platforms.contains(platform))
}

/// 依次执行完整生命周期；`cleanup` 的失败只记日志，不覆盖执行结果
pub async fn run_lifecycle(
    component: &dyn Component,
    ctx: &RunContext,
    ct: &CancellationToken,
) -> Result<(), VcError> {
    if !is_supported_on(component, &ctx.platform)? {
        return Err(VcError::platform_not_supported(format!(
            "component '{}' does not support the {} platform",
            component.name(),
            ctx.platform
        )));
    }
    if ct.is_cancelled() {
        return Err(VcError::Cancelled);
    }

    let result = match component.initialize(ctx, ct).await {
        Ok(()) => component.execute(ctx, ct).await,
        Err(e) => Err(e),
    };
    if let Err(e) = component.cleanup(ctx).await {
        tracing::warn!(component = %component.name(), "component cleanup failed: {}", e);
    }

    let descriptor = component.descriptor();
    result.map_err(|e| e.with_component(&descriptor.component_type, descriptor.scenario().as_deref()))
}
