//! 进程监管器：创建（含提权）、启动并等待、kill
//!
//! 每个创建出的句柄都会在运行的清理注册表中登记强杀动作，任何中止路径 drain 注册表即可回收全部子进程。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::command::CommandSpec;
use super::elevation::{apply_elevation, Elevation, ElevationContext};
use super::handle::{OsProcess, ProcessHandle};
use crate::core::{CleanupRegistry, VcError};

/// `start_and_wait` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 进程自行退出（被信号结束时退出码为 None）
    Exited(Option<i32>),
    /// 取消令牌触发或被 kill，进程已被结束
    Cancelled,
}

pub struct ProcessSupervisor {
    cleanup: Arc<CleanupRegistry>,
    elevation: ElevationContext,
    kill_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(cleanup: Arc<CleanupRegistry>, elevation: ElevationContext, kill_grace: Duration) -> Self {
        Self {
            cleanup,
            elevation,
            kill_grace,
        }
    }

    pub fn elevation_context(&self) -> &ElevationContext {
        &self.elevation
    }

    /// 创建进程句柄（不启动）
    pub fn create(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&std::path::Path>,
        elevated: bool,
    ) -> Result<Arc<OsProcess>, VcError> {
        let mut spec = CommandSpec::new(command).args(args.iter().cloned());
        spec.working_dir = working_dir.map(|p| p.to_path_buf());
        self.create_with(command, spec, &Elevation::from_flag(elevated))
    }

    /// 以完整命令与提权方式创建句柄，`name` 用于日志与错误上下文
    pub fn create_with(
        &self,
        name: &str,
        spec: CommandSpec,
        elevation: &Elevation,
    ) -> Result<Arc<OsProcess>, VcError> {
        let spec = apply_elevation(spec, elevation, &self.elevation)?;
        let process = Arc::new(OsProcess::new(name, spec, self.kill_grace));

        // 只持有弱引用：已结束并被释放的句柄（连同捕获的输出）不被注册表钉住
        let registered = Arc::downgrade(&process);
        self.cleanup
            .register(format!("kill process '{name}'"), move || {
                if let Some(process) = registered.upgrade() {
                    process.force_kill();
                }
                Ok(())
            });
        Ok(process)
    }

    /// 启动并等待退出；`ct` 触发时结束进程并返回 `Cancelled`
    pub async fn start_and_wait(
        &self,
        process: &OsProcess,
        ct: &CancellationToken,
    ) -> Result<ProcessOutcome, VcError> {
        if ct.is_cancelled() {
            process.kill();
            return Ok(ProcessOutcome::Cancelled);
        }
        process.start()?;
        self.wait_for_exit(process, ct).await
    }

    /// 等待已启动的进程退出；`ct` 触发时结束进程并返回 `Cancelled`
    pub async fn wait_for_exit(
        &self,
        process: &OsProcess,
        ct: &CancellationToken,
    ) -> Result<ProcessOutcome, VcError> {
        tokio::select! {
            exit = process.wait() => {
                let exit = exit?;
                if exit.killed {
                    Ok(ProcessOutcome::Cancelled)
                } else {
                    Ok(ProcessOutcome::Exited(exit.code))
                }
            }
            _ = ct.cancelled() => {
                tracing::info!(process = %process.name(), pid = ?process.pid(), "cancellation requested, killing process");
                self.kill(process);
                if tokio::time::timeout(self.kill_grace, process.wait()).await.is_err() {
                    tracing::warn!(process = %process.name(), "process did not report exit within the kill grace period");
                }
                Ok(ProcessOutcome::Cancelled)
            }
        }
    }

    pub fn kill(&self, process: &OsProcess) {
        process.kill();
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::platform::OsPlatform;
    use std::time::Instant;

    fn supervisor(cleanup: Arc<CleanupRegistry>) -> ProcessSupervisor {
        let elevation = ElevationContext {
            platform: OsPlatform::Linux,
            use_sudo: false,
            running_as_root: false,
        };
        ProcessSupervisor::new(cleanup, elevation, Duration::from_millis(500))
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_start_and_wait_returns_exit_code() {
        let cleanup = Arc::new(CleanupRegistry::new());
        let sup = supervisor(cleanup.clone());
        let p = sup.create("sh", &sh("exit 4"), None, false).unwrap();
        let outcome = sup.start_and_wait(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Exited(Some(4)));
        assert_eq!(cleanup.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_kills_promptly() {
        let sup = supervisor(Arc::new(CleanupRegistry::new()));
        let p = sup.create("sh", &sh("sleep 30"), None, false).unwrap();
        let ct = CancellationToken::new();
        let trigger = ct.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = sup.start_and_wait(&p, &ct).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(p.has_exited());
    }

    #[tokio::test]
    async fn test_finished_processes_are_released() {
        let cleanup = Arc::new(CleanupRegistry::new());
        let sup = supervisor(cleanup.clone());
        let mut released = Vec::new();
        for _ in 0..50 {
            let p = sup.create("sh", &sh("echo done"), None, false).unwrap();
            let outcome = sup.start_and_wait(&p, &CancellationToken::new()).await.unwrap();
            assert_eq!(outcome, ProcessOutcome::Exited(Some(0)));
            released.push(Arc::downgrade(&p));
        }
        assert!(released.iter().all(|w| w.upgrade().is_none()));
        assert_eq!(cleanup.drain(), 50);
    }

    #[tokio::test]
    async fn test_dropping_running_handle_kills_process() {
        let sup = supervisor(Arc::new(CleanupRegistry::new()));
        let p = sup.create("sh", &sh("sleep 30"), None, false).unwrap();
        p.start().unwrap();
        let pid = p.pid().unwrap();
        drop(p);

        let deadline = Instant::now() + Duration::from_secs(5);
        while alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive(pid));
    }

    fn alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_cleanup_drain_kills_running_process() {
        let cleanup = Arc::new(CleanupRegistry::new());
        let sup = supervisor(cleanup.clone());
        let p = sup.create("sh", &sh("sleep 30"), None, false).unwrap();
        p.start().unwrap();

        assert_eq!(cleanup.drain(), 1);
        let exit = tokio::time::timeout(Duration::from_secs(5), p.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(exit.killed);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_starts() {
        let sup = supervisor(Arc::new(CleanupRegistry::new()));
        let p = sup.create("sh", &sh("exit 0"), None, false).unwrap();
        let ct = CancellationToken::new();
        ct.cancel();
        assert_eq!(sup.start_and_wait(&p, &ct).await.unwrap(), ProcessOutcome::Cancelled);
        assert!(!p.is_started());
    }
}
