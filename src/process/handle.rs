//! 进程句柄
//!
//! `OsProcess` 拥有一个操作系统进程的整个生命周期：启动后由后台等待任务持有子进程，
//! 并发读取 stdout / stderr，直到进程退出或收到 kill 信号。kill 会结束整个进程组（Unix）
//! 或进程树（Windows），不会留下孤儿子进程。

use std::any::Any;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::command::CommandSpec;
use crate::core::{ErrorReason, VcError};

/// 进程结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// 被信号结束时为 None
    pub code: Option<i32>,
    /// 是否由 kill 结束
    pub killed: bool,
}

/// 进程句柄的公共视图
///
/// 亲和性等需要操作系统进程的功能通过 `as_any` 识别具体实现，不兼容的实现返回 NotSupported。
pub trait ProcessHandle: Send + Sync {
    fn name(&self) -> &str;

    fn pid(&self) -> Option<u32>;

    fn has_exited(&self) -> bool;

    fn exit_code(&self) -> Option<i32>;

    fn stdout(&self) -> String;

    fn stderr(&self) -> String;

    /// 请求结束进程（幂等）
    fn kill(&self);

    fn as_any(&self) -> &dyn Any;
}

/// 操作系统进程
pub struct OsProcess {
    name: String,
    spec: CommandSpec,
    kill_token: CancellationToken,
    started: AtomicBool,
    pid: OnceLock<u32>,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    grace: Duration,
}

impl OsProcess {
    pub fn new(name: impl Into<String>, spec: CommandSpec, grace: Duration) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            name: name.into(),
            spec,
            kill_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            pid: OnceLock::new(),
            stdout: Arc::new(Mutex::new(String::new())),
            stderr: Arc::new(Mutex::new(String::new())),
            exit_tx,
            grace,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn exit(&self) -> Option<ProcessExit> {
        *self.exit_tx.borrow()
    }

    /// 启动进程；每个句柄只能启动一次
    pub fn start(&self) -> Result<(), VcError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(VcError::InvalidOperation(format!(
                "process '{}' has already been started",
                self.name
            )));
        }
        if self.kill_token.is_cancelled() {
            self.exit_tx.send_replace(Some(ProcessExit { code: None, killed: true }));
            return Err(VcError::Cancelled);
        }

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.spec.env {
            cmd.env(k, v);
        }
        // 独立进程组，kill 时连同子孙一起结束
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let pid = child.id().unwrap_or_default();
        let _ = self.pid.set(pid);
        tracing::info!(process = %self.name, pid, command = %self.spec, "process started");

        let out_task = child
            .stdout
            .take()
            .map(|s| tokio::spawn(capture(s, Arc::clone(&self.stdout))));
        let err_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(capture(s, Arc::clone(&self.stderr))));

        let kill_token = self.kill_token.clone();
        let exit_tx = self.exit_tx.clone();
        let name = self.name.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => ProcessExit {
                    code: status.ok().and_then(|s| s.code()),
                    killed: false,
                },
                _ = kill_token.cancelled() => {
                    kill_tree(pid);
                    let _ = child.kill().await;
                    ProcessExit { code: None, killed: true }
                }
            };

            // 孙进程可能仍持有管道，读取任务最多再等 grace
            let drain = async {
                if let Some(t) = out_task {
                    let _ = t.await;
                }
                if let Some(t) = err_task {
                    let _ = t.await;
                }
            };
            let _ = tokio::time::timeout(grace, drain).await;

            tracing::debug!(process = %name, pid, code = ?exit.code, killed = exit.killed, "process exited");
            exit_tx.send_replace(Some(exit));
        });
        Ok(())
    }

    /// 等待进程结束
    pub async fn wait(&self) -> Result<ProcessExit, VcError> {
        if !self.is_started() {
            return Err(VcError::InvalidOperation(format!(
                "process '{}' has not been started",
                self.name
            )));
        }
        let mut rx = self.exit_tx.subscribe();
        let exit = *rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| VcError::InvalidOperation(format!("process '{}' was lost", self.name)))?;
        Ok(exit.unwrap_or(ProcessExit { code: None, killed: true }))
    }

    /// 同步强杀（清理阶段使用，不依赖后台任务继续被调度）
    pub fn force_kill(&self) {
        self.kill_token.cancel();
        if let Some(pid) = self.pid.get() {
            if !self.has_exited() {
                kill_tree(*pid);
            }
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> VcError {
        if e.kind() == std::io::ErrorKind::NotFound {
            VcError::DependencyMissing {
                message: format!("command '{}' was not found: {e}", self.spec.program),
                reason: ErrorReason::WorkloadDependencyMissing,
            }
        } else {
            VcError::Workload {
                component: self.name.clone(),
                scenario: None,
                message: format!("failed to start '{}': {e}", self.spec),
                exit_code: None,
                stderr: String::new(),
                reason: ErrorReason::WorkloadFailed,
            }
        }
    }
}

/// 句柄被释放时仍在运行的进程随之结束
impl Drop for OsProcess {
    fn drop(&mut self) {
        if self.is_started() && !self.has_exited() {
            self.force_kill();
        }
    }
}

impl ProcessHandle for OsProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    fn has_exited(&self) -> bool {
        self.exit().is_some()
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit().and_then(|e| e.code)
    }

    fn stdout(&self) -> String {
        self.stdout.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn stderr(&self) -> String {
        self.stderr.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn kill(&self) {
        self.kill_token.cancel();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

async fn capture<R>(stream: R, sink: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin,
{
    // 按字节读取：非 UTF-8 输出也必须一直读到 EOF，否则子进程会因 SIGPIPE 退出
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if let Ok(mut buf) = sink.lock() {
                    buf.push_str(&String::from_utf8_lossy(&line));
                }
            }
            Err(e) => {
                tracing::debug!("output stream closed: {}", e);
                break;
            }
        }
    }
}

/// 结束进程组 / 进程树；失败只记日志
#[cfg(unix)]
fn kill_tree(pid: u32) {
    if pid == 0 {
        return;
    }
    let result = std::process::Command::new("kill")
        .args(["-9", "--", &format!("-{pid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        tracing::warn!(pid, "failed to kill process group: {}", e);
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    if pid == 0 {
        return;
    }
    let result = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        tracing::warn!(pid, "failed to kill process tree: {}", e);
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    fn sh(script: &str) -> OsProcess {
        OsProcess::new(
            "test",
            CommandSpec::new("sh").arg("-c").arg(script),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let p = sh("echo out; echo err 1>&2; exit 3");
        p.start().unwrap();
        let exit = p.wait().await.unwrap();
        assert_eq!(exit, ProcessExit { code: Some(3), killed: false });
        assert_eq!(p.stdout(), "out\n");
        assert_eq!(p.stderr(), "err\n");
        assert!(p.has_exited());
        assert!(p.pid().is_some());
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_drained_to_eof() {
        let p = sh("printf '\\377\\n'; i=0; while [ $i -lt 20000 ]; do echo line$i; i=$((i+1)); done; exit 0");
        p.start().unwrap();
        let exit = p.wait().await.unwrap();
        assert_eq!(exit, ProcessExit { code: Some(0), killed: false });
        let out = p.stdout();
        assert!(out.starts_with('\u{FFFD}'));
        assert_eq!(out.lines().count(), 20001);
        assert!(out.ends_with("line19999\n"));
    }

    #[tokio::test]
    async fn test_kill_ends_long_running_process() {
        let p = sh("sleep 30");
        p.start().unwrap();
        p.kill();
        let exit = tokio::time::timeout(Duration::from_secs(5), p.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(exit.killed);
    }

    #[tokio::test]
    async fn test_start_twice_and_wait_unstarted() {
        let p = sh("true");
        assert!(matches!(p.wait().await, Err(VcError::InvalidOperation(_))));
        p.start().unwrap();
        assert!(matches!(p.start(), Err(VcError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_dependency_missing() {
        let p = OsProcess::new(
            "missing",
            CommandSpec::new("definitely-not-a-real-binary-xyz"),
            Duration::from_millis(100),
        );
        assert!(matches!(p.start(), Err(VcError::DependencyMissing { .. })));
    }
}
