//! 清理注册表：运行期内只追加，结束（或取消）时统一执行一次
//!
//! 每个被创建的子进程都会登记一个 kill 动作；任何中止路径（错误、取消、退出）
//! 调用 `drain` 即可保证不留下孤儿进程。单个清理动作的失败或 panic 只记日志，不影响其它动作。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

type CleanupAction = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

struct CleanupEntry {
    name: String,
    action: CleanupAction,
}

/// 清理动作列表
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<CleanupEntry>>,
    drained: AtomicBool,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记清理动作；若注册表已被清空（运行已结束），立即执行该动作
    pub fn register<F>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let entry = CleanupEntry {
            name: name.into(),
            action: Box::new(action),
        };

        {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            if !self.drained.load(Ordering::SeqCst) {
                entries.push(entry);
                return;
            }
        }

        tracing::debug!(cleanup = %entry.name, "cleanup registered after drain, running immediately");
        run_entry(entry);
    }

    /// 执行全部清理动作，仅第一次调用生效；返回执行的动作数
    pub fn drain(&self) -> usize {
        let entries = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            if self.drained.swap(true, Ordering::SeqCst) {
                return 0;
            }
            std::mem::take(&mut *entries)
        };

        let count = entries.len();
        if count > 0 {
            tracing::info!("Running {} cleanup actions...", count);
        }
        for entry in entries {
            run_entry(entry);
        }
        count
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn run_entry(entry: CleanupEntry) {
    let CleanupEntry { name, action } = entry;
    match catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(())) => tracing::debug!(cleanup = %name, "cleanup action completed"),
        Ok(Err(e)) => tracing::warn!(cleanup = %name, "cleanup action failed: {}", e),
        Err(_) => tracing::warn!(cleanup = %name, "cleanup action panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_drain_runs_each_action_once() {
        let registry = CleanupRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let c = count.clone();
            registry.register(format!("entry-{i}"), move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.drain(), 3);
        assert_eq!(registry.drain(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failures_are_suppressed() {
        let registry = CleanupRegistry::new();
        let ran = Arc::new(AtomicBool::new(false));
        registry.register("fails", || anyhow::bail!("kill failed"));
        registry.register("panics", || panic!("boom"));
        let r = ran.clone();
        registry.register("last", move || {
            r.store(true, Ordering::SeqCst);
            Ok(())
        });
        registry.drain();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_register_after_drain_runs_immediately() {
        let registry = CleanupRegistry::new();
        registry.drain();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        registry.register("late", move || {
            r.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(ran.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }
}
