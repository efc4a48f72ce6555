//! VClient - 多角色基准测试编排引擎
//!
//! 模块划分：
//! - **affinity**: CPU 亲和性规划（Windows 掩码 / Linux 区间串 / numactl 前缀）
//! - **components**: 组件生命周期、注册表与内置组件
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **coordination**: 跨机状态交换（HTTP 客户端、axum API 服务端、进程内实现）
//! - **core**: 错误分类、运行上下文、清理注册表、关闭信号
//! - **observability**: tracing 订阅器初始化
//! - **orchestrator**: Profile 执行编排（依赖 / 动作 / 监视器）
//! - **packages**: 依赖包查找
//! - **parsers**: 指标解析协作者
//! - **platform**: 操作系统与 CPU 架构
//! - **process**: 进程监管（提权、启动等待、kill、退出码策略）
//! - **profile**: Profile 模型、参数内联、角色布局、运行计时
//! - **state**: 本机状态存储（文件 / 内存）

pub mod affinity;
pub mod components;
pub mod config;
pub mod coordination;
pub mod core;
pub mod observability;
pub mod orchestrator;
pub mod packages;
pub mod parsers;
pub mod platform;
pub mod process;
pub mod profile;
pub mod state;

pub use crate::core::{ErrorReason, VcError};
pub use crate::orchestrator::{ActionFailurePolicy, Orchestrator, RunOptions, RunResult};
