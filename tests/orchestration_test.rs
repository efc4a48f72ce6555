//! 编排端到端测试：多角色握手、依赖幂等、依赖缺失中止与取消

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use vclient::components::ComponentRegistry;
use vclient::config::AppConfig;
use vclient::coordination::{CoordinationClient, InMemoryCoordinationClient};
use vclient::core::{RunContext, RunContextBuilder};
use vclient::orchestrator::ComponentOutcome;
use vclient::packages::DirectoryPackageManager;
use vclient::platform::PlatformArchitecture;
use vclient::profile::{Profile, ProfileTiming, RoleLayout};
use vclient::state::{FileStateStore, InMemoryStateStore, StateStore};
use vclient::{Orchestrator, RunOptions, VcError};

const LAYOUT: &str = r#"{
    "Clients": [
        { "Name": "agent-client", "IPAddress": "10.0.0.1", "Role": "Client" },
        { "Name": "agent-server", "IPAddress": "10.0.0.2", "Role": "Server" }
    ]
}"#;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.api.poll_interval_ms = 20;
    config.process.kill_grace_ms = 200;
    config.execution.exit_wait_secs = 2;
    config
}

async fn context(
    packages_dir: &Path,
    state: Arc<dyn StateStore>,
    api: Arc<dyn CoordinationClient>,
    layout: Option<RoleLayout>,
) -> RunContext {
    let mut builder = RunContextBuilder::new(test_config())
        .with_platform(PlatformArchitecture::LINUX_X64)
        .with_state_store(state)
        .with_coordination(api)
        .with_package_manager(Arc::new(DirectoryPackageManager::new(packages_dir)));
    if let Some(layout) = layout {
        builder = builder.with_layout(layout);
    }
    builder.build().await.unwrap()
}

fn orchestrator(ctx: RunContext) -> Orchestrator {
    Orchestrator::new(
        ctx,
        ComponentRegistry::with_builtins(),
        RunOptions::from_config(&test_config().execution),
    )
}

fn shell(script: &str) -> String {
    // Profile 是 JSON，命令里的双引号需要转义
    format!("sh -c \\\"{script}\\\"")
}

#[cfg(unix)]
#[tokio::test]
async fn test_client_waits_for_server_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("db-created");
    let client_out = dir.path().join("client.out");
    let installed = dir.path().join("db-installed");

    let profile = Profile::from_json(&format!(
        r#"{{
            "Dependencies": [
                {{ "Type": "ExecuteCommand", "Role": "Server",
                   "Parameters": {{ "Scenario": "InstallDb", "Command": "{install}" }} }}
            ],
            "Actions": [
                {{ "Type": "ExecuteCommand", "Role": "Server",
                   "Parameters": {{ "Scenario": "CreateDb", "Command": "{create}" }} }},
                {{ "Type": "PublishState", "Role": "Server",
                   "Parameters": {{ "Key": "DBReady", "Ready": true }} }},
                {{ "Type": "WaitForState", "Role": "Client",
                   "Parameters": {{ "Key": "DBReady", "TargetRole": "Server",
                                   "ExpectedState": "{{\"ready\": true}}", "Timeout": "10" }} }},
                {{ "Type": "ExecuteCommand", "Role": "Client",
                   "Parameters": {{ "Scenario": "Workload", "Command": "{workload}" }} }}
            ]
        }}"#,
        install = shell(&format!("echo installed > {}", installed.display())),
        create = shell(&format!("sleep 0.3 && echo created > {}", marker.display())),
        workload = shell(&format!("cat {} > {}", marker.display(), client_out.display())),
    ))
    .unwrap();

    let api = InMemoryCoordinationClient::new();
    let server_ctx = context(
        dir.path(),
        Arc::new(InMemoryStateStore::new()),
        Arc::new(api.clone()),
        Some(RoleLayout::from_json(LAYOUT, "agent-server").unwrap()),
    )
    .await;
    let client_ctx = context(
        dir.path(),
        Arc::new(InMemoryStateStore::new()),
        Arc::new(api.clone()),
        Some(RoleLayout::from_json(LAYOUT, "agent-client").unwrap()),
    )
    .await;

    let ct = CancellationToken::new();
    let (client, server) = tokio::join!(
        orchestrator(client_ctx).run(&profile, None, ProfileTiming::OneIteration, false, &ct),
        orchestrator(server_ctx).run(&profile, None, ProfileTiming::OneIteration, false, &ct),
    );
    let (client, server) = (client.unwrap(), server.unwrap());

    assert!(server.succeeded(), "server failures: {:?}", server.failures);
    assert!(client.succeeded(), "client failures: {:?}", client.failures);
    // 客户端的负载只有在服务端发布之后才开始，因此能读到标记文件
    assert_eq!(std::fs::read_to_string(&client_out).unwrap().trim(), "created");
    assert!(installed.exists());
    assert_eq!(client.outcomes_for("ExecuteCommand (InstallDb)").count(), 0);
    assert_eq!(client.outcomes_for("ExecuteCommand (CreateDb)").count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_dependencies_are_not_repeated_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("install.log");
    let profile = Profile::from_json(&format!(
        r#"{{
            "Dependencies": [
                {{ "Type": "ExecuteCommand", "Parameters": {{ "Scenario": "Install", "Command": "{install}" }} }}
            ]
        }}"#,
        install = shell(&format!("echo installed >> {}", log.display())),
    ))
    .unwrap();

    let state: Arc<dyn StateStore> = Arc::new(FileStateStore::open(dir.path().join("state")).await.unwrap());
    let api: Arc<dyn CoordinationClient> = Arc::new(InMemoryCoordinationClient::new());
    let ct = CancellationToken::new();

    for _ in 0..2 {
        let ctx = context(dir.path(), Arc::clone(&state), Arc::clone(&api), None).await;
        let result = orchestrator(ctx)
            .run(&profile, None, ProfileTiming::OneIteration, true, &ct)
            .await
            .unwrap();
        assert!(result.succeeded());
        assert!(result.dependencies_only);
    }

    assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 1);

    // 第三次运行从检查点判断已完成，记录为跳过
    let ctx = context(dir.path(), Arc::clone(&state), Arc::clone(&api), None).await;
    let result = orchestrator(ctx)
        .run(&profile, None, ProfileTiming::OneIteration, true, &ct)
        .await
        .unwrap();
    assert!(matches!(
        result.outcomes_for("ExecuteCommand (Install)").next(),
        Some(ComponentOutcome::Skipped { .. })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_dependency_aborts_before_actions() {
    let dir = tempfile::tempdir().unwrap();
    let touched = dir.path().join("action-ran");
    let profile = Profile::from_json(&format!(
        r#"{{
            "Dependencies": [
                {{ "Type": "DependencyPackage", "Parameters": {{ "PackageName": "postgresql" }} }}
            ],
            "Actions": [
                {{ "Type": "ExecuteCommand", "Parameters": {{ "Command": "{touch}" }} }}
            ]
        }}"#,
        touch = shell(&format!("touch {}", touched.display())),
    ))
    .unwrap();

    let ctx = context(
        dir.path(),
        Arc::new(InMemoryStateStore::new()),
        Arc::new(InMemoryCoordinationClient::new()),
        None,
    )
    .await;
    let err = orchestrator(ctx)
        .run(&profile, None, ProfileTiming::OneIteration, false, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, VcError::DependencyMissing { .. }));
    assert!(!touched.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_unnamed_dependencies_of_one_type_all_run() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = (dir.path().join("a"), dir.path().join("b"));
    let profile = Profile::from_json(&format!(
        r#"{{
            "Dependencies": [
                {{ "Type": "ExecuteCommand", "Parameters": {{ "Command": "touch {a}" }} }},
                {{ "Type": "ExecuteCommand", "Parameters": {{ "Command": "touch {b}" }} }}
            ]
        }}"#,
        a = a.display(),
        b = b.display(),
    ))
    .unwrap();

    let ctx = context(
        dir.path(),
        Arc::new(InMemoryStateStore::new()),
        Arc::new(InMemoryCoordinationClient::new()),
        None,
    )
    .await;
    let result = orchestrator(ctx)
        .run(&profile, None, ProfileTiming::OneIteration, true, &CancellationToken::new())
        .await
        .unwrap();

    assert!(a.exists());
    assert!(b.exists());
    assert!(result
        .outcomes_for("ExecuteCommand")
        .all(|o| *o == ComponentOutcome::Succeeded));
    assert_eq!(result.outcomes_for("ExecuteCommand").count(), 2);
}

#[cfg(unix)]
fn process_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancellation_stops_running_workload() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let profile = Profile::from_json(&format!(
        r#"{{ "Actions": [ {{ "Type": "ExecuteCommand", "Parameters": {{ "Command": "{cmd}" }} }} ] }}"#,
        cmd = shell(&format!("echo $$ > {}; exec sleep 30", pid_file.display())),
    ))
    .unwrap();

    let ctx = context(
        dir.path(),
        Arc::new(InMemoryStateStore::new()),
        Arc::new(InMemoryCoordinationClient::new()),
        None,
    )
    .await;

    let ct = CancellationToken::new();
    let trigger = ct.clone();
    let watched = pid_file.clone();
    tokio::spawn(async move {
        // 等进程写出 pid 再取消
        while !watched.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = orchestrator(ctx)
        .run(&profile, None, ProfileTiming::Forever, false, &ct)
        .await
        .unwrap();

    assert!(result.cancelled);
    assert!(!result.succeeded());
    assert!(started.elapsed() < Duration::from_secs(10));

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let pid = pid.trim();
    assert!(!pid.is_empty());
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!process_alive(pid), "workload process {pid} is still running");
}
