//! 组件注册表
//!
//! 按类型名（大小写不敏感）登记构造器，编排器用它把 Profile 描述实例化为组件。
//! 未登记的类型属于 Profile 定义错误。

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    Component, DeleteState, DependencyPackage, ExecuteCommand, ExecuteCommandMonitor, ParallelExecution,
    PublishState, SequentialExecution, WaitForState,
};
use crate::core::VcError;
use crate::profile::ComponentDescriptor;

/// 组件构造器；注册表本身传入，供组合组件构造子组件
pub type ComponentFactory =
    Arc<dyn Fn(&ComponentDescriptor, &ComponentRegistry) -> Result<Arc<dyn Component>, VcError> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ComponentRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 含全部内置组件类型的注册表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("ExecuteCommand", |d, _| Ok(Arc::new(ExecuteCommand::new(d.clone())?)));
        registry.register("ExecuteCommandMonitor", |d, _| {
            Ok(Arc::new(ExecuteCommandMonitor::new(d.clone())?))
        });
        registry.register("PublishState", |d, _| Ok(Arc::new(PublishState::new(d.clone())?)));
        registry.register("WaitForState", |d, _| Ok(Arc::new(WaitForState::new(d.clone())?)));
        registry.register("DeleteState", |d, _| Ok(Arc::new(DeleteState::new(d.clone())?)));
        registry.register("DependencyPackage", |d, _| {
            Ok(Arc::new(DependencyPackage::new(d.clone())?))
        });
        registry.register("SequentialExecution", |d, r| {
            Ok(Arc::new(SequentialExecution::new(d.clone(), r)?))
        });
        registry.register("ParallelExecution", |d, r| {
            Ok(Arc::new(ParallelExecution::new(d.clone(), r)?))
        });
        registry
    }

    pub fn register<F>(&mut self, component_type: &str, factory: F)
    where
        F: Fn(&ComponentDescriptor, &ComponentRegistry) -> Result<Arc<dyn Component>, VcError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(component_type.to_lowercase(), Arc::new(factory));
    }

    pub fn contains(&self, component_type: &str) -> bool {
        self.factories.contains_key(&component_type.to_lowercase())
    }

    /// 按描述构造组件（同时完成参数到强类型配置的解析）
    pub fn create(&self, descriptor: &ComponentDescriptor) -> Result<Arc<dyn Component>, VcError> {
        let factory = self
            .factories
            .get(&descriptor.component_type.to_lowercase())
            .ok_or_else(|| {
                VcError::schema(format!(
                    "component type '{}' is not a known component type",
                    descriptor.component_type
                ))
            })?;
        factory(descriptor, self)
    }

    pub fn component_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorReason;

    #[test]
    fn test_builtins_are_registered_case_insensitively() {
        let registry = ComponentRegistry::with_builtins();
        assert!(registry.contains("executecommand"));
        assert!(registry.contains("WAITFORSTATE"));
        assert_eq!(registry.component_types().len(), 8);

        let d = ComponentDescriptor::action("executeCommand").with_param("Command", "echo hi");
        assert_eq!(registry.create(&d).unwrap().name(), "executeCommand");
    }

    #[test]
    fn test_unknown_type_is_profile_error() {
        let registry = ComponentRegistry::with_builtins();
        let err = registry
            .create(&ComponentDescriptor::action("FioExecutor"))
            .err()
            .unwrap();
        assert_eq!(err.reason(), ErrorReason::InvalidProfileDefinition);
        assert!(err.aborts_run());
    }

    #[test]
    fn test_invalid_parameters_fail_at_construction() {
        let registry = ComponentRegistry::with_builtins();
        assert!(registry.create(&ComponentDescriptor::action("ExecuteCommand")).is_err());
    }
}
