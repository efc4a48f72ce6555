//! 运行上下文构建器：从配置组装状态存储、包管理器、进程监管器与协调客户端
//!
//! 测试可以逐项替换（内存状态存储、共享的进程内协调客户端等）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::coordination::{CoordinationClient, HttpCoordinationClient};
use crate::core::{CleanupRegistry, RunContext, VcError};
use crate::packages::{DirectoryPackageManager, PackageManager};
use crate::platform::PlatformArchitecture;
use crate::process::{ElevationContext, ProcessSupervisor};
use crate::profile::RoleLayout;
use crate::state::{FileStateStore, StateStore};

pub struct RunContextBuilder {
    config: AppConfig,
    platform: Option<PlatformArchitecture>,
    role: Option<String>,
    layout: Option<RoleLayout>,
    cleanup: Option<Arc<CleanupRegistry>>,
    state: Option<Arc<dyn StateStore>>,
    packages: Option<Arc<dyn PackageManager>>,
    coordination: Option<Arc<dyn CoordinationClient>>,
}

impl RunContextBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            platform: None,
            role: None,
            layout: None,
            cleanup: None,
            state: None,
            packages: None,
            coordination: None,
        }
    }

    pub fn with_platform(mut self, platform: PlatformArchitecture) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_layout(mut self, layout: RoleLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_cleanup(mut self, cleanup: Arc<CleanupRegistry>) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_package_manager(mut self, packages: Arc<dyn PackageManager>) -> Self {
        self.packages = Some(packages);
        self
    }

    /// 所有角色共用同一个协调客户端（同机多角色 / 测试）
    pub fn with_coordination(mut self, client: Arc<dyn CoordinationClient>) -> Self {
        self.coordination = Some(client);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 构建运行上下文；未替换的部分按配置创建
    pub async fn build(self) -> Result<RunContext, VcError> {
        let platform = match self.platform {
            Some(p) => p,
            None => PlatformArchitecture::current()?,
        };
        let cleanup = self.cleanup.unwrap_or_default();

        let state: Arc<dyn StateStore> = match self.state {
            Some(s) => s,
            None => Arc::new(FileStateStore::open(self.config.agent.state_dir.clone()).await?),
        };
        let packages: Arc<dyn PackageManager> = match self.packages {
            Some(p) => p,
            None => Arc::new(DirectoryPackageManager::new(self.config.agent.packages_dir.clone())),
        };

        let elevation = ElevationContext::detect(platform.os, self.config.process.elevate_with_sudo);
        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::clone(&cleanup),
            elevation,
            Duration::from_millis(self.config.process.kill_grace_ms),
        ));

        let api = &self.config.api;
        let local_api: Arc<dyn CoordinationClient> = match &self.coordination {
            Some(c) => Arc::clone(c),
            None => Arc::new(HttpCoordinationClient::for_agent("127.0.0.1", api)?),
        };

        let mut ctx = RunContext::new(
            platform,
            self.config.agent.resolved_name(),
            cleanup,
            state,
            packages,
            supervisor,
            Arc::clone(&local_api),
            api.poll_interval(),
        );
        if let Some(role) = self.role {
            ctx = ctx.with_role(role);
        }

        if let Some(layout) = self.layout {
            // 每个角色取布局中第一个 agent 作为其协调端点
            let mut roles: Vec<(String, String)> = Vec::new();
            for agent in layout.agents() {
                if !roles.iter().any(|(r, _)| r.eq_ignore_ascii_case(&agent.role)) {
                    roles.push((agent.role.clone(), agent.address.clone()));
                }
            }
            for (role, address) in roles {
                let client: Arc<dyn CoordinationClient> = match &self.coordination {
                    Some(c) => Arc::clone(c),
                    None => Arc::new(HttpCoordinationClient::for_agent(&address, api)?),
                };
                ctx = ctx.with_peer(&role, client);
            }
            ctx = ctx.with_layout(layout);
        }

        tracing::debug!(
            agent = %ctx.agent_name,
            role = ?ctx.role,
            platform = %ctx.platform,
            "run context built"
        );
        Ok(ctx)
    }
}

/// 便捷函数：按配置文件创建构建器，加载失败时使用默认配置
pub fn create_context_builder(config_path: Option<PathBuf>) -> RunContextBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    RunContextBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::InMemoryCoordinationClient;
    use crate::profile::AgentEntry;
    use crate::state::InMemoryStateStore;

    fn layout() -> RoleLayout {
        RoleLayout::new(
            vec![
                AgentEntry::new("client-vm", "10.0.0.1", "Client"),
                AgentEntry::new("server-vm", "10.0.0.2", "Server"),
            ],
            "client-vm",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_with_overrides() {
        let shared = Arc::new(InMemoryCoordinationClient::new());
        let ctx = RunContextBuilder::new(AppConfig::default())
            .with_platform(PlatformArchitecture::LINUX_X64)
            .with_state_store(Arc::new(InMemoryStateStore::new()))
            .with_coordination(shared)
            .with_layout(layout())
            .build()
            .await
            .unwrap();

        assert_eq!(ctx.role.as_deref(), Some("Client"));
        assert!(ctx.api_for_role(Some("server")).is_ok());
        assert!(ctx.api_for_role(None).is_ok());
        assert!(matches!(
            ctx.api_for_role(Some("Database")),
            Err(VcError::Layout { .. })
        ));
    }

    #[tokio::test]
    async fn test_default_http_endpoints_from_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.agent.state_dir = dir.path().join("state");
        config.agent.packages_dir = dir.path().join("packages");

        let ctx = RunContextBuilder::new(config)
            .with_platform(PlatformArchitecture::LINUX_X64)
            .with_layout(layout())
            .build()
            .await
            .unwrap();
        assert!(ctx.api_for_role(Some("Server")).is_ok());
        assert!(dir.path().join("state").is_dir());
    }
}
