//! 角色布局：一次多机运行中各 agent 的名称、地址与角色
//!
//! 布局文件（JSON）形如 `{"Agents": [{"Name": "vm0", "IPAddress": "10.0.0.4", "Role": "Server"}]}`，
//! 兼容 `Clients` 作为数组键名。恰好有一个条目代表本机。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::VcError;

/// 布局中的一个 agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentEntry {
    #[serde(alias = "name")]
    pub name: String,
    #[serde(rename = "IPAddress", alias = "ipAddress", alias = "Address", alias = "address")]
    pub address: String,
    #[serde(alias = "role")]
    pub role: String,
}

impl AgentEntry {
    pub fn new(name: impl Into<String>, address: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            role: role.into(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawLayout {
    #[serde(default, alias = "agents", alias = "Clients", alias = "clients")]
    agents: Vec<AgentEntry>,
}

/// 角色布局
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleLayout {
    agents: Vec<AgentEntry>,
    local: usize,
}

impl RoleLayout {
    /// `local_name` 必须恰好匹配一个条目（名称或地址，大小写不敏感）
    pub fn new(agents: Vec<AgentEntry>, local_name: &str) -> Result<Self, VcError> {
        let matches: Vec<usize> = agents
            .iter()
            .enumerate()
            .filter(|(_, a)| {
                a.name.eq_ignore_ascii_case(local_name) || a.address.eq_ignore_ascii_case(local_name)
            })
            .map(|(i, _)| i)
            .collect();

        match matches.as_slice() {
            [local] => Ok(Self { local: *local, agents }),
            [] => Err(VcError::layout(format!(
                "the environment layout has no entry for the local agent '{local_name}'"
            ))),
            _ => Err(VcError::layout(format!(
                "the environment layout has more than one entry for the local agent '{local_name}'"
            ))),
        }
    }

    pub fn from_json(json: &str, local_name: &str) -> Result<Self, VcError> {
        let raw: RawLayout = serde_json::from_str(json)
            .map_err(|e| VcError::layout(format!("environment layout is not valid: {e}")))?;
        Self::new(raw.agents, local_name)
    }

    pub async fn load(path: &Path, local_name: &str) -> Result<Self, VcError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json, local_name)
    }

    pub fn agents(&self) -> &[AgentEntry] {
        &self.agents
    }

    pub fn local(&self) -> &AgentEntry {
        &self.agents[self.local]
    }

    pub fn local_role(&self) -> &str {
        &self.local().role
    }

    pub fn agents_in_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a AgentEntry> + 'a {
        self.agents.iter().filter(move |a| a.has_role(role))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.agents.iter().any(|a| a.has_role(role))
    }

    /// 第一个承担 `role` 的 agent；不存在时返回布局错误
    pub fn require_role(&self, role: &str) -> Result<&AgentEntry, VcError> {
        self.agents.iter().find(|a| a.has_role(role)).ok_or_else(|| {
            VcError::layout(format!(
                "the environment layout does not define an agent with the '{role}' role"
            ))
        })
    }

    /// 本机之外的 agent
    pub fn peers(&self) -> impl Iterator<Item = &AgentEntry> {
        let local = self.local;
        self.agents
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != local)
            .map(|(_, a)| a)
    }
}
