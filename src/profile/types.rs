//! Profile 数据模型与 JSON 加载
//!
//! Profile 文档结构（键名 PascalCase，兼容 camelCase）：
//! `Description`、`Parameters`、`Metadata`、`MinimumExecutionInterval`、
//! `Dependencies` / `Actions` / `Monitors`，每个元素含 `Type`、可选 `Role`/`Roles`、
//! `Parameters` 与嵌套 `Components`。加载后立即完成参数内联，此后不可变。

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::inline::inline_profile;
use super::params::{split_list, Parameters};
use crate::core::VcError;
use crate::platform::{parse_platform_list, PlatformArchitecture};

/// 组件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Dependency,
    Action,
    Monitor,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dependency => "Dependency",
            Self::Action => "Action",
            Self::Monitor => "Monitor",
        };
        f.write_str(s)
    }
}

/// Profile 中的一个组件描述
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDescriptor {
    pub kind: ComponentKind,
    /// 组件类型标识（注册表按此查找构造器）
    pub component_type: String,
    /// 适用角色；为空表示所有角色
    pub roles: Vec<String>,
    pub parameters: Parameters,
    /// 子组件（按声明顺序由父组件执行）
    pub components: Vec<ComponentDescriptor>,
}

impl ComponentDescriptor {
    pub fn new(kind: ComponentKind, component_type: impl Into<String>) -> Self {
        Self {
            kind,
            component_type: component_type.into(),
            roles: Vec::new(),
            parameters: Parameters::new(),
            components: Vec::new(),
        }
    }

    pub fn dependency(component_type: impl Into<String>) -> Self {
        Self::new(ComponentKind::Dependency, component_type)
    }

    pub fn action(component_type: impl Into<String>) -> Self {
        Self::new(ComponentKind::Action, component_type)
    }

    pub fn monitor(component_type: impl Into<String>) -> Self {
        Self::new(ComponentKind::Monitor, component_type)
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<super::ParamValue>) -> Self {
        self.parameters.insert(key, value);
        self
    }

    pub fn scenario(&self) -> Option<String> {
        self.parameters.get_string("Scenario")
    }

    /// 日志与结果中使用的名称：`Type (Scenario)`
    pub fn display_name(&self) -> String {
        match self.scenario() {
            Some(s) => format!("{} ({})", self.component_type, s),
            None => self.component_type.clone(),
        }
    }

    pub fn applies_to_all_roles(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn applies_to_role(&self, role: &str) -> bool {
        self.applies_to_all_roles() || self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// 组件及其子组件涉及的全部角色（`Role` 与 `TargetRole`）
    pub fn addressed_roles(&self) -> Vec<String> {
        let own = self
            .roles
            .iter()
            .cloned()
            .chain(self.parameters.get_string("TargetRole"));
        let nested = self.components.iter().flat_map(|c| c.addressed_roles());

        let mut roles: Vec<String> = Vec::new();
        for role in own.chain(nested) {
            if !roles.iter().any(|r| r.eq_ignore_ascii_case(&role)) {
                roles.push(role);
            }
        }
        roles
    }

    /// `Optional=true`：所需角色不在布局中时跳过而非报错
    pub fn is_optional(&self) -> Result<bool, VcError> {
        self.parameters.bool_or("Optional", false)
    }

    pub fn fail_fast(&self) -> Result<bool, VcError> {
        self.parameters.bool_or("FailFast", false)
    }

    /// Profile 中声明的支持平台（`SupportedPlatforms` 参数）
    pub fn supported_platforms(&self) -> Result<Vec<PlatformArchitecture>, VcError> {
        match self.parameters.get_string("SupportedPlatforms") {
            Some(raw) => parse_platform_list(&raw),
            None => Ok(Vec::new()),
        }
    }

    /// 场景过滤：`include` 只作用于 Action；`exclude`（`-Name`）作用于全部种类
    pub fn is_selected(&self, scenarios: &[String]) -> bool {
        let (excluded, included): (Vec<&String>, Vec<&String>) =
            scenarios.iter().partition(|s| s.trim().starts_with('-'));
        let scenario = self.scenario();
        let matches = |name: &str| {
            scenario
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(name.trim()))
        };

        if excluded
            .iter()
            .any(|s| matches(s.trim().trim_start_matches('-')))
        {
            return false;
        }
        if self.kind == ComponentKind::Action && !included.is_empty() {
            return included.iter().any(|s| matches(s));
        }
        true
    }
}

/// 执行 Profile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub description: Option<String>,
    pub parameters: Parameters,
    pub metadata: Parameters,
    pub minimum_execution_interval: Option<Duration>,
    pub dependencies: Vec<ComponentDescriptor>,
    pub actions: Vec<ComponentDescriptor>,
    pub monitors: Vec<ComponentDescriptor>,
}

impl Profile {
    /// 解析 JSON 并内联参数引用
    pub fn from_json(json: &str) -> Result<Self, VcError> {
        Self::from_json_with_overrides(json, &Parameters::new())
    }

    /// 解析 JSON，先用 `overrides` 覆盖 Profile 级参数，再内联
    pub fn from_json_with_overrides(json: &str, overrides: &Parameters) -> Result<Self, VcError> {
        let raw: RawProfile = serde_json::from_str(json)
            .map_err(|e| VcError::schema(format!("profile document is not valid: {e}")))?;
        let mut profile = raw.into_profile()?;
        for (key, value) in overrides.iter() {
            profile.parameters.insert(key, value.clone());
        }
        inline_profile(profile)
    }

    /// 所有组件（依赖、动作、监视器）按声明顺序
    pub fn all_components(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.dependencies
            .iter()
            .chain(self.actions.iter())
            .chain(self.monitors.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.actions.is_empty() && self.monitors.is_empty()
    }
}

/// 从文件加载 Profile
pub async fn load_profile(path: &Path, overrides: &Parameters) -> Result<Profile, VcError> {
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        VcError::schema(format!("profile '{}' could not be read: {e}", path.display()))
    })?;
    let profile = Profile::from_json_with_overrides(&json, overrides)?;
    tracing::info!(
        profile = %path.display(),
        dependencies = profile.dependencies.len(),
        actions = profile.actions.len(),
        monitors = profile.monitors.len(),
        "profile loaded"
    );
    Ok(profile)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawProfile {
    #[serde(default, alias = "description")]
    description: Option<String>,
    #[serde(default, alias = "parameters")]
    parameters: Parameters,
    #[serde(default, alias = "metadata")]
    metadata: Parameters,
    #[serde(default, alias = "minimumExecutionInterval")]
    minimum_execution_interval: Option<super::ParamValue>,
    #[serde(default, alias = "dependencies")]
    dependencies: Vec<RawElement>,
    #[serde(default, alias = "actions")]
    actions: Vec<RawElement>,
    #[serde(default, alias = "monitors")]
    monitors: Vec<RawElement>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawElement {
    #[serde(alias = "type")]
    r#type: String,
    #[serde(default, alias = "role")]
    role: Option<String>,
    #[serde(default, alias = "roles")]
    roles: Vec<String>,
    #[serde(default, alias = "parameters")]
    parameters: Parameters,
    #[serde(default, alias = "components")]
    components: Vec<RawElement>,
}

impl RawProfile {
    fn into_profile(self) -> Result<Profile, VcError> {
        let minimum_execution_interval = self
            .minimum_execution_interval
            .map(|v| parse_timespan(&v.to_string()))
            .transpose()?;
        let convert = |kind, items: Vec<RawElement>| -> Result<Vec<_>, VcError> {
            items.into_iter().map(|e| e.into_descriptor(kind)).collect()
        };

        Ok(Profile {
            description: self.description,
            parameters: self.parameters,
            metadata: self.metadata,
            minimum_execution_interval,
            dependencies: convert(ComponentKind::Dependency, self.dependencies)?,
            actions: convert(ComponentKind::Action, self.actions)?,
            monitors: convert(ComponentKind::Monitor, self.monitors)?,
        })
    }
}

impl RawElement {
    fn into_descriptor(self, kind: ComponentKind) -> Result<ComponentDescriptor, VcError> {
        if self.r#type.trim().is_empty() {
            return Err(VcError::schema(format!("a {kind} element is missing its 'Type'")));
        }

        let mut roles = self.roles;
        if let Some(role) = self.role {
            roles.extend(split_list(&role));
        }
        // Role 也可以作为普通参数出现
        roles.extend(self.parameters.get_list("Role"));
        roles.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

        let components = self
            .components
            .into_iter()
            .map(|c| c.into_descriptor(kind))
            .collect::<Result<_, _>>()?;

        Ok(ComponentDescriptor {
            kind,
            component_type: self.r#type.trim().to_string(),
            roles,
            parameters: self.parameters,
            components,
        })
    }
}

/// 时间间隔：纯数字按秒，`hh:mm:ss` 形式按时分秒
pub fn parse_timespan(raw: &str) -> Result<Duration, VcError> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<f64>() {
        if secs >= 0.0 {
            return Ok(Duration::from_secs_f64(secs));
        }
    }
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() == 3 {
        let nums: Option<Vec<f64>> = parts.iter().map(|p| p.parse::<f64>().ok()).collect();
        if let Some(n) = nums {
            if n.iter().all(|v| *v >= 0.0) {
                return Ok(Duration::from_secs_f64(n[0] * 3600.0 + n[1] * 60.0 + n[2]));
            }
        }
    }
    Err(VcError::schema(format!("invalid time span '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"{
        "Description": "client/server example",
        "MinimumExecutionInterval": "00:01:30",
        "Parameters": { "Port": 6379 },
        "Dependencies": [
            { "Type": "DependencyPackage", "Role": "Server", "Parameters": { "PackageName": "redis" } }
        ],
        "Actions": [
            { "Type": "ExecuteCommand", "Parameters": { "Scenario": "Run", "Role": "Client" } },
            { "type": "ExecuteCommand", "roles": ["Server"], "parameters": { "Scenario": "Serve" } }
        ],
        "Monitors": []
    }"#;

    #[test]
    fn test_parse_profile_document() {
        let profile = Profile::from_json(PROFILE).unwrap();
        assert_eq!(profile.description.as_deref(), Some("client/server example"));
        assert_eq!(profile.minimum_execution_interval, Some(Duration::from_secs(90)));
        assert_eq!(profile.dependencies[0].roles, vec!["Server"]);
        assert_eq!(profile.actions[0].roles, vec!["Client"]);
        assert_eq!(profile.actions[1].roles, vec!["Server"]);
        assert_eq!(profile.actions[1].kind, ComponentKind::Action);
        assert_eq!(profile.all_components().count(), 3);
    }

    #[test]
    fn test_missing_type_is_schema_error() {
        let err = Profile::from_json(r#"{ "Actions": [ { "Type": " " } ] }"#).unwrap_err();
        assert!(matches!(err, VcError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_role_matching_is_case_insensitive() {
        let d = ComponentDescriptor::action("X").with_role("Server");
        assert!(d.applies_to_role("server"));
        assert!(!d.applies_to_role("Client"));
        assert!(ComponentDescriptor::action("Y").applies_to_role("anything"));
    }

    #[test]
    fn test_addressed_roles_include_sub_components() {
        let profile = Profile::from_json(
            r#"{ "Actions": [ { "Type": "SequentialExecution", "Role": "Client", "Components": [
                { "Type": "WaitForState", "Parameters": { "Key": "k", "TargetRole": "Server" } },
                { "Type": "ExecuteCommand", "Role": "client" }
            ] } ] }"#,
        )
        .unwrap();
        assert_eq!(profile.actions[0].addressed_roles(), vec!["Client", "Server"]);
    }

    #[test]
    fn test_scenario_selection() {
        let action = ComponentDescriptor::action("X").with_param("Scenario", "Latency");
        let dep = ComponentDescriptor::dependency("D").with_param("Scenario", "Install");

        assert!(action.is_selected(&[]));
        assert!(action.is_selected(&["latency".into()]));
        assert!(!action.is_selected(&["Bandwidth".into()]));
        assert!(!action.is_selected(&["-Latency".into()]));
        // include 不作用于依赖
        assert!(dep.is_selected(&["Bandwidth".into()]));
        assert!(!dep.is_selected(&["-Install".into()]));
    }

    #[test]
    fn test_parse_timespan() {
        assert_eq!(parse_timespan("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_timespan("01:00:05").unwrap(), Duration::from_secs(3605));
        assert!(parse_timespan("soon").is_err());
    }
}
