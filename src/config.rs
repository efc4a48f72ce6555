//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VC__*` 覆盖（双下划线表示嵌套，如 `VC__API__PORT=4501`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub api: ApiSection,
    pub execution: ExecutionSection,
    pub process: ProcessSection,
    pub logging: LoggingSection,
}

/// [agent] 段：本机名称、状态与包目录
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 本机在布局中的名称，未设置时取 HOSTNAME / COMPUTERNAME
    pub name: Option<String>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_packages_dir")]
    pub packages_dir: PathBuf,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: None,
            state_dir: default_state_dir(),
            packages_dir: default_packages_dir(),
        }
    }
}

impl AgentSection {
    pub fn resolved_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "local".to_string())
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_packages_dir() -> PathBuf {
    PathBuf::from("packages")
}

/// [api] 段：协调 API 端口、轮询与重试
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// WaitFor 轮询间隔（毫秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
            poll_interval_ms: default_poll_interval_ms(),
            retries: default_retries(),
            retry_base_ms: default_retry_base_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApiSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_port() -> u16 {
    4500
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_retries() -> u32 {
    10
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// [execution] 段：失败策略与退出等待
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    /// 任一动作失败即中止整个运行
    #[serde(default)]
    pub fail_fast: bool,
    /// 运行结束后等待后台工作收尾的上限（秒）
    #[serde(default = "default_exit_wait_secs")]
    pub exit_wait_secs: u64,
    /// 两轮迭代开始时间的最小间隔（秒），Profile 中的设置优先
    pub minimum_interval_secs: Option<u64>,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            fail_fast: false,
            exit_wait_secs: default_exit_wait_secs(),
            minimum_interval_secs: None,
        }
    }
}

fn default_exit_wait_secs() -> u64 {
    10
}

/// [process] 段：提权方式与强杀宽限
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    /// Unix 下 elevated 命令是否以 sudo 包装（已是 root 时无需）
    #[serde(default = "default_elevate_with_sudo")]
    pub elevate_with_sudo: bool,
    /// 取消后等待输出读取收尾的时间（毫秒）
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            elevate_with_sudo: default_elevate_with_sudo(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

fn default_elevate_with_sudo() -> bool {
    true
}

fn default_kill_grace_ms() -> u64 {
    2000
}

/// [logging] 段
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// 默认过滤指令，RUST_LOG 优先
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// 从 config 目录加载配置，环境变量 VC__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VC__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VC")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.api.port, 4500);
        assert_eq!(cfg.api.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.api.retries, 10);
        assert_eq!(cfg.execution.exit_wait_secs, 10);
        assert!(!cfg.execution.fail_fast);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[api]\nport = 4600\n\n[execution]\nfail_fast = true\n\n[agent]\nname = \"vm-server\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.api.port, 4600);
        assert_eq!(cfg.api.retries, 10);
        assert!(cfg.execution.fail_fast);
        assert_eq!(cfg.agent.resolved_name(), "vm-server");
    }
}
