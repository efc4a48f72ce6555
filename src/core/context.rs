//! 运行上下文：一次运行中所有组件共享的协作者
//!
//! 取代进程级全局状态：清理注册表、状态存储、协调客户端、包管理器与进程监管器
//! 都挂在这里，由编排器创建并传给每个组件。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::coordination::CoordinationClient;
use crate::core::{CleanupRegistry, VcError};
use crate::packages::PackageManager;
use crate::platform::PlatformArchitecture;
use crate::process::ProcessSupervisor;
use crate::profile::RoleLayout;
use crate::state::StateStore;

pub struct RunContext {
    pub platform: PlatformArchitecture,
    pub agent_name: String,
    /// 本机角色；未设置表示单机运行，所有组件都适用
    pub role: Option<String>,
    pub layout: Option<RoleLayout>,
    pub cleanup: Arc<CleanupRegistry>,
    pub state: Arc<dyn StateStore>,
    pub packages: Arc<dyn PackageManager>,
    pub supervisor: Arc<ProcessSupervisor>,
    /// WaitFor 的默认轮询间隔
    pub poll_interval: Duration,
    local_api: Arc<dyn CoordinationClient>,
    /// 角色名（小写） -> 该角色 agent 的协调客户端
    peer_apis: HashMap<String, Arc<dyn CoordinationClient>>,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: PlatformArchitecture,
        agent_name: impl Into<String>,
        cleanup: Arc<CleanupRegistry>,
        state: Arc<dyn StateStore>,
        packages: Arc<dyn PackageManager>,
        supervisor: Arc<ProcessSupervisor>,
        local_api: Arc<dyn CoordinationClient>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            platform,
            agent_name: agent_name.into(),
            role: None,
            layout: None,
            cleanup,
            state,
            packages,
            supervisor,
            poll_interval,
            local_api,
            peer_apis: HashMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_layout(mut self, layout: RoleLayout) -> Self {
        if self.role.is_none() {
            self.role = Some(layout.local_role().to_string());
        }
        self.layout = Some(layout);
        self
    }

    /// 登记承担 `role` 的对端 API 客户端
    pub fn with_peer(mut self, role: &str, client: Arc<dyn CoordinationClient>) -> Self {
        self.peer_apis.insert(role.to_lowercase(), client);
        self
    }

    /// 本机的协调 API
    pub fn local_api(&self) -> Arc<dyn CoordinationClient> {
        Arc::clone(&self.local_api)
    }

    /// 目标角色的协调 API；`None` 或本机角色返回本机 API，其余角色没有登记时返回布局错误
    pub fn api_for_role(&self, role: Option<&str>) -> Result<Arc<dyn CoordinationClient>, VcError> {
        let Some(role) = role else {
            return Ok(self.local_api());
        };
        if let Some(client) = self.peer_apis.get(&role.to_lowercase()) {
            return Ok(Arc::clone(client));
        }
        if self.is_local_role(role) {
            return Ok(self.local_api());
        }
        if let Some(layout) = &self.layout {
            layout.require_role(role)?;
        }
        Err(VcError::layout(format!(
            "no coordination endpoint is known for an agent in the '{role}' role"
        )))
    }

    pub fn is_local_role(&self, role: &str) -> bool {
        self.role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(role))
    }
}
