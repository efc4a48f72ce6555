//! 组合组件：把 Profile 元素的 `Components` 子组件按顺序或并行执行

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use super::{run_lifecycle, Component, ComponentRegistry};
use crate::core::{RunContext, VcError};
use crate::profile::ComponentDescriptor;

fn build_children(
    descriptor: &ComponentDescriptor,
    registry: &ComponentRegistry,
) -> Result<Vec<Arc<dyn Component>>, VcError> {
    if descriptor.components.is_empty() {
        return Err(VcError::schema(format!(
            "component '{}' does not define any sub-components",
            descriptor.display_name()
        )));
    }
    descriptor
        .components
        .iter()
        .map(|child| registry.create(child))
        .collect()
}

/// 适用于本机角色的子组件；未确定角色时全部适用
fn applicable<'a>(children: &'a [Arc<dyn Component>], ctx: &RunContext) -> Vec<&'a Arc<dyn Component>> {
    children
        .iter()
        .filter(|child| match &ctx.role {
            Some(role) => {
                let applies = child.descriptor().applies_to_role(role);
                if !applies {
                    tracing::debug!(component = %child.name(), role = %role, "sub-component does not apply to this role");
                }
                applies
            }
            None => true,
        })
        .collect()
}

/// 按声明顺序执行子组件，任一失败即停止
pub struct SequentialExecution {
    descriptor: ComponentDescriptor,
    children: Vec<Arc<dyn Component>>,
}

impl SequentialExecution {
    pub fn new(descriptor: ComponentDescriptor, registry: &ComponentRegistry) -> Result<Self, VcError> {
        let children = build_children(&descriptor, registry)?;
        Ok(Self { descriptor, children })
    }
}

#[async_trait]
impl Component for SequentialExecution {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError> {
        for child in applicable(&self.children, ctx) {
            if ct.is_cancelled() {
                return Err(VcError::Cancelled);
            }
            run_lifecycle(child.as_ref(), ctx, ct).await?;
        }
        Ok(())
    }
}

/// 并行执行全部子组件；任一失败时取消其余子组件，返回第一个错误
pub struct ParallelExecution {
    descriptor: ComponentDescriptor,
    children: Vec<Arc<dyn Component>>,
}

impl ParallelExecution {
    pub fn new(descriptor: ComponentDescriptor, registry: &ComponentRegistry) -> Result<Self, VcError> {
        let children = build_children(&descriptor, registry)?;
        Ok(Self { descriptor, children })
    }
}

#[async_trait]
impl Component for ParallelExecution {
    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &RunContext, ct: &CancellationToken) -> Result<(), VcError> {
        let group = ct.child_token();
        let runs = applicable(&self.children, ctx).into_iter().map(|child| {
            let group = group.clone();
            async move {
                let result = run_lifecycle(child.as_ref(), ctx, &group).await;
                if result.is_err() {
                    group.cancel();
                }
                result
            }
        });

        let mut first_error = None;
        for result in join_all(runs).await {
            match result {
                Ok(()) => {}
                // 兄弟组件失败引起的取消不掩盖真正的错误
                Err(VcError::Cancelled) if !ct.is_cancelled() => {
                    first_error.get_or_insert(VcError::Cancelled);
                }
                Err(e) => {
                    if matches!(first_error, None | Some(VcError::Cancelled)) {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
