//! 进程级关闭信号
//!
//! Ctrl+C / SIGTERM 统一转换为根 CancellationToken 的取消；编排器从该 token 派生运行 token，
//! 因此任何一个信号都会让正在执行的组件停止、并触发清理注册表的统一回收。

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// 运行被取消的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupted,
    /// SIGTERM
    Terminated,
    /// 宿主内部原因（如协调 API 无法继续服务）
    Requested(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => f.write_str("interrupted (Ctrl+C)"),
            Self::Terminated => f.write_str("terminated (SIGTERM)"),
            Self::Requested(why) => write!(f, "requested: {why}"),
        }
    }
}

/// 根取消令牌 + 第一次关闭的原因
#[derive(Default)]
pub struct ShutdownManager {
    root: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// 取消根令牌；只保留第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
        self.root.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }

    /// 安装 Ctrl+C 与 SIGTERM 处理
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, cancelling run...");
                manager.shutdown(ShutdownReason::Interrupted);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        tracing::info!("Received SIGTERM, cancelling run...");
                        manager.shutdown(ShutdownReason::Terminated);
                    }
                    Err(e) => tracing::warn!("SIGTERM handler not installed: {}", e),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let run = manager.token().child_token();
        assert!(manager.reason().is_none());

        manager.shutdown(ShutdownReason::Terminated);
        manager.shutdown(ShutdownReason::Interrupted);
        assert!(run.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::Terminated));
    }

    #[test]
    fn test_reason_display() {
        let reason = ShutdownReason::Requested("coordination API stopped".into());
        assert_eq!(reason.to_string(), "requested: coordination API stopped");
    }
}
