//! 执行编排器
//!
//! 一次运行的流程：
//! 1. 按角色与场景筛选组件，校验组件所需角色都在布局中，构造全部组件（参数错误在此暴露）
//! 2. 依赖阶段：逐个执行，成功后在状态存储中打检查点，已成功的依赖直接跳过
//! 3. 启动监视器（后台任务），按计时策略循环执行动作
//! 4. 结束（正常、出错或取消）时停止监视器并清空清理注册表，保证不留子进程

mod result;

pub use result::{ComponentOutcome, ComponentRecord, RunFailure, RunResult};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::components::{is_supported_on, run_lifecycle, Component, ComponentRegistry};
use crate::config::ExecutionSection;
use crate::core::{RunContext, VcError};
use crate::profile::{ComponentDescriptor, ComponentKind, Profile, ProfileTiming};
use crate::state::StateStoreExt;

/// 动作阶段非致命错误的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionFailurePolicy {
    /// 结束当前迭代，记录失败，继续后续迭代
    #[default]
    ContinueOnFailure,
    /// 任何动作失败都中止整个运行
    FailFast,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 场景过滤：`Name` 只运行指定的动作场景，`-Name` 排除任意种类的场景
    pub scenarios: Vec<String>,
    pub failure_policy: ActionFailurePolicy,
    /// 停止监视器时等待其退出的上限
    pub exit_wait: Duration,
    /// 覆盖 Profile 的 `MinimumExecutionInterval`
    pub minimum_interval: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            scenarios: Vec::new(),
            failure_policy: ActionFailurePolicy::default(),
            exit_wait: Duration::from_secs(10),
            minimum_interval: None,
        }
    }
}

impl RunOptions {
    pub fn from_config(execution: &ExecutionSection) -> Self {
        Self {
            scenarios: Vec::new(),
            failure_policy: if execution.fail_fast {
                ActionFailurePolicy::FailFast
            } else {
                ActionFailurePolicy::ContinueOnFailure
            },
            exit_wait: Duration::from_secs(execution.exit_wait_secs),
            minimum_interval: execution.minimum_interval_secs.map(Duration::from_secs),
        }
    }

    pub fn with_scenarios(mut self, scenarios: Vec<String>) -> Self {
        self.scenarios = scenarios;
        self
    }

    pub fn with_failure_policy(mut self, policy: ActionFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// 依赖检查点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyState {
    pub succeeded: bool,
    pub completed_at: DateTime<Utc>,
    /// 累计执行次数（含失败）
    pub attempts: u32,
}

/// 依赖检查点的状态键：`dependency:<type>:<scenario>`
///
/// 没有 `Scenario` 时以参数内容的 UUIDv5 区分同类型的依赖，参数相同才视为同一个依赖。
pub fn dependency_state_key(descriptor: &ComponentDescriptor) -> String {
    let identity = match descriptor.scenario() {
        Some(scenario) => scenario,
        None => {
            let canonical = serde_json::to_string(&descriptor.parameters).unwrap_or_default();
            Uuid::new_v5(&Uuid::NAMESPACE_OID, canonical.as_bytes())
                .simple()
                .to_string()
        }
    };
    format!("dependency:{}:{}", descriptor.component_type, identity).to_lowercase()
}

type MonitorTask = JoinHandle<Result<(), VcError>>;

struct Planned {
    descriptor: ComponentDescriptor,
    component: Arc<dyn Component>,
}

impl Planned {
    fn name(&self) -> String {
        self.descriptor.display_name()
    }
}

#[derive(Default)]
struct Plan {
    dependencies: Vec<Planned>,
    actions: Vec<Planned>,
    monitors: Vec<Planned>,
}

pub struct Orchestrator {
    ctx: Arc<RunContext>,
    registry: ComponentRegistry,
    options: RunOptions,
}

impl Orchestrator {
    /// 运行上下文（及其清理注册表）只服务一次运行
    pub fn new(ctx: RunContext, registry: ComponentRegistry, options: RunOptions) -> Self {
        Self {
            ctx: Arc::new(ctx),
            registry,
            options,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// 执行 Profile。`role` 为 None 时使用上下文中的本机角色；两者都没有时所有组件都适用。
    ///
    /// 依赖缺失、布局错误与终止性错误返回 `Err`；外部取消返回 `cancelled = true` 的结果。
    pub async fn run(
        self,
        profile: &Profile,
        role: Option<&str>,
        timing: ProfileTiming,
        dependencies_only: bool,
        ct: &CancellationToken,
    ) -> Result<RunResult, VcError> {
        let started = Instant::now();
        let role = role.map(str::to_string).or_else(|| self.ctx.role.clone());
        tracing::info!(
            agent = %self.ctx.agent_name,
            role = ?role,
            timing = %timing,
            dependencies_only,
            "run starting"
        );

        let mut result = RunResult {
            dependencies_only,
            ..RunResult::default()
        };
        let run_ct = ct.child_token();
        let mut monitors = Vec::new();

        let outcome = self
            .run_phases(profile, role.as_deref(), timing, dependencies_only, &run_ct, &mut result, &mut monitors)
            .await;

        run_ct.cancel();
        self.stop_monitors(monitors, &mut result).await;
        let reaped = self.ctx.cleanup.drain();
        if reaped > 0 {
            tracing::debug!(count = reaped, "cleanup actions executed");
        }

        result.cancelled = ct.is_cancelled();
        result.elapsed = started.elapsed();
        match outcome {
            Ok(()) => {
                tracing::info!(
                    iterations = result.iterations,
                    failures = result.failures.len(),
                    cancelled = result.cancelled,
                    elapsed_secs = result.elapsed.as_secs_f64(),
                    "run completed"
                );
                Ok(result)
            }
            Err(VcError::Cancelled) => {
                result.cancelled = true;
                tracing::info!("run cancelled");
                Ok(result)
            }
            Err(e) => {
                tracing::error!(reason = e.reason().code(), "run aborted: {}", e);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phases(
        &self,
        profile: &Profile,
        role: Option<&str>,
        timing: ProfileTiming,
        dependencies_only: bool,
        run_ct: &CancellationToken,
        result: &mut RunResult,
        monitors: &mut Vec<(String, MonitorTask)>,
    ) -> Result<(), VcError> {
        let plan = self.plan(profile, role, dependencies_only, result)?;

        self.run_dependencies(&plan.dependencies, run_ct, result).await?;
        if dependencies_only {
            tracing::info!("dependencies-only run, skipping actions and monitors");
            return Ok(());
        }

        for planned in plan.monitors {
            monitors.push((planned.name(), self.spawn_monitor(planned, run_ct.child_token())));
        }

        let minimum_interval = self.options.minimum_interval.or(profile.minimum_execution_interval);
        self.run_actions(&plan.actions, timing, minimum_interval, run_ct, result).await
    }

    /// 筛选、校验并构造组件
    fn plan(
        &self,
        profile: &Profile,
        role: Option<&str>,
        dependencies_only: bool,
        result: &mut RunResult,
    ) -> Result<Plan, VcError> {
        let mut plan = Plan::default();
        for descriptor in profile.all_components() {
            if dependencies_only && descriptor.kind != ComponentKind::Dependency {
                continue;
            }
            let name = descriptor.display_name();

            // 布局校验覆盖所有组件（含不在本机运行的），以便尽早发现缺少的角色
            if let Some(layout) = &self.ctx.layout {
                let missing: Vec<String> = descriptor
                    .addressed_roles()
                    .into_iter()
                    .filter(|r| !layout.has_role(r))
                    .collect();
                if !missing.is_empty() {
                    if descriptor.is_optional()? {
                        tracing::warn!(component = %name, roles = ?missing, "required role not in layout, optional component skipped");
                        result.record(
                            &name,
                            descriptor.kind,
                            None,
                            ComponentOutcome::Skipped {
                                reason: format!("no agent in the layout has role(s) {missing:?}"),
                            },
                        );
                        continue;
                    }
                    return Err(VcError::layout(format!(
                        "component '{name}' requires an agent in role(s) {missing:?} but the layout has none"
                    )));
                }
            }
            if let Some(role) = role {
                if !descriptor.applies_to_role(role) {
                    tracing::debug!(component = %name, role = %role, "component does not apply to this role");
                    continue;
                }
            }
            if !descriptor.is_selected(&self.options.scenarios) {
                tracing::debug!(component = %name, "component excluded by scenario filter");
                continue;
            }

            let planned = Planned {
                component: self.registry.create(descriptor)?,
                descriptor: descriptor.clone(),
            };
            match descriptor.kind {
                ComponentKind::Dependency => plan.dependencies.push(planned),
                ComponentKind::Action => plan.actions.push(planned),
                ComponentKind::Monitor => plan.monitors.push(planned),
            }
        }
        tracing::debug!(
            dependencies = plan.dependencies.len(),
            actions = plan.actions.len(),
            monitors = plan.monitors.len(),
            "execution plan resolved"
        );
        Ok(plan)
    }

    /// 平台不支持只对该组件致命：记录失败后继续
    fn check_platform(
        &self,
        planned: &Planned,
        iteration: Option<u64>,
        result: &mut RunResult,
    ) -> Result<bool, VcError> {
        if is_supported_on(planned.component.as_ref(), &self.ctx.platform)? {
            return Ok(true);
        }
        let err = VcError::platform_not_supported(format!(
            "component '{}' does not support the {} platform",
            planned.name(),
            self.ctx.platform
        ));
        tracing::error!(component = %planned.name(), "{}", err);
        result.record_failure(&planned.name(), planned.descriptor.kind, iteration, &err);
        Ok(false)
    }

    async fn run_dependencies(
        &self,
        dependencies: &[Planned],
        ct: &CancellationToken,
        result: &mut RunResult,
    ) -> Result<(), VcError> {
        for planned in dependencies {
            if ct.is_cancelled() {
                return Err(VcError::Cancelled);
            }
            let name = planned.name();
            if !self.check_platform(planned, None, result)? {
                continue;
            }

            let key = dependency_state_key(&planned.descriptor);
            let previous: Option<DependencyState> = self.ctx.state.get_state(&key, ct).await?;
            if previous.as_ref().is_some_and(|s| s.succeeded) {
                tracing::info!(component = %name, key = %key, "dependency already completed, skipping");
                result.record(
                    &name,
                    ComponentKind::Dependency,
                    None,
                    ComponentOutcome::Skipped {
                        reason: "dependency already completed on this system".into(),
                    },
                );
                continue;
            }

            tracing::info!(component = %name, "installing dependency");
            let outcome = run_lifecycle(planned.component.as_ref(), &self.ctx, ct).await;
            if matches!(outcome, Err(VcError::Cancelled)) || ct.is_cancelled() {
                result.record(&name, ComponentKind::Dependency, None, ComponentOutcome::Cancelled);
                return Err(VcError::Cancelled);
            }

            let checkpoint = DependencyState {
                succeeded: outcome.is_ok(),
                completed_at: Utc::now(),
                attempts: previous.map_or(0, |s| s.attempts) + 1,
            };
            self.ctx.state.save_state(&key, &checkpoint, ct).await?;

            match outcome {
                Ok(()) => result.record(&name, ComponentKind::Dependency, None, ComponentOutcome::Succeeded),
                Err(e) => {
                    result.record_failure(&name, ComponentKind::Dependency, None, &e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 监视器错误只记日志并计入非致命失败，不影响动作
    fn spawn_monitor(&self, planned: Planned, ct: CancellationToken) -> MonitorTask {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            let name = planned.name();
            tracing::info!(component = %name, "monitor starting");
            match run_lifecycle(planned.component.as_ref(), &ctx, &ct).await {
                Ok(()) | Err(VcError::Cancelled) => {
                    tracing::info!(component = %name, "monitor stopped");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(component = %name, reason = e.reason().code(), "monitor failed: {}", e);
                    Err(e)
                }
            }
        })
    }

    async fn stop_monitors(&self, monitors: Vec<(String, MonitorTask)>, result: &mut RunResult) {
        for (name, handle) in monitors {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.options.exit_wait, handle).await {
                Ok(Ok(Ok(()))) => {
                    result.record(&name, ComponentKind::Monitor, None, ComponentOutcome::Succeeded);
                }
                Ok(Ok(Err(e))) => result.record_failure(&name, ComponentKind::Monitor, None, &e),
                Ok(Err(e)) => {
                    let err = VcError::InvalidOperation(format!("monitor task failed: {e}"));
                    tracing::error!(component = %name, "{}", err);
                    result.record_failure(&name, ComponentKind::Monitor, None, &err);
                }
                Err(_) => {
                    tracing::warn!(component = %name, "monitor did not stop within the exit wait, aborting it");
                    abort.abort();
                    result.record(&name, ComponentKind::Monitor, None, ComponentOutcome::Cancelled);
                }
            }
        }
    }

    async fn run_actions(
        &self,
        actions: &[Planned],
        timing: ProfileTiming,
        minimum_interval: Option<Duration>,
        run_ct: &CancellationToken,
        result: &mut RunResult,
    ) -> Result<(), VcError> {
        if actions.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let action_ct = run_ct.child_token();
        let deadline = timing.hard_deadline().map(|limit| {
            let ct = action_ct.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        tracing::info!("run duration reached, cancelling in-flight actions");
                        ct.cancel();
                    }
                    _ = ct.cancelled() => {}
                }
            })
        });

        let outcome = self
            .iterate(actions, timing, minimum_interval, started, &action_ct, result)
            .await;
        if let Some(task) = deadline {
            task.abort();
        }
        outcome
    }

    async fn iterate(
        &self,
        actions: &[Planned],
        timing: ProfileTiming,
        minimum_interval: Option<Duration>,
        started: Instant,
        ct: &CancellationToken,
        result: &mut RunResult,
    ) -> Result<(), VcError> {
        let mut last_start: Option<Instant> = None;

        'iterations: while timing.may_start_iteration(result.iterations, started.elapsed()) {
            if ct.is_cancelled() {
                break;
            }
            if let (Some(min), Some(last)) = (minimum_interval, last_start) {
                let ready = last + min;
                if Instant::now() < ready {
                    tracing::debug!(
                        wait_secs = ready.saturating_duration_since(Instant::now()).as_secs_f64(),
                        "waiting for minimum execution interval"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep_until(ready) => {}
                        _ = ct.cancelled() => break,
                    }
                }
            }
            last_start = Some(Instant::now());
            let iteration = result.iterations + 1;
            tracing::info!(iteration, "iteration starting");

            for planned in actions {
                if ct.is_cancelled() || !timing.may_start_action(started.elapsed()) {
                    break 'iterations;
                }
                let name = planned.name();
                if !self.check_platform(planned, Some(iteration), result)? {
                    continue;
                }

                let scenario = planned.descriptor.scenario();
                tracing::info!(component = %name, scenario = ?scenario, iteration, "action starting");
                match run_lifecycle(planned.component.as_ref(), &self.ctx, ct).await {
                    Ok(()) => {
                        result.record(&name, ComponentKind::Action, Some(iteration), ComponentOutcome::Succeeded);
                    }
                    Err(e) if e.is_cancelled() || ct.is_cancelled() => {
                        result.record(&name, ComponentKind::Action, Some(iteration), ComponentOutcome::Cancelled);
                        break 'iterations;
                    }
                    Err(e) => {
                        tracing::error!(
                            component = %name,
                            scenario = ?scenario,
                            iteration,
                            reason = e.reason().code(),
                            "action failed: {}",
                            e
                        );
                        result.record_failure(&name, ComponentKind::Action, Some(iteration), &e);
                        if e.aborts_run()
                            || self.options.failure_policy == ActionFailurePolicy::FailFast
                            || planned.descriptor.fail_fast()?
                        {
                            return Err(e);
                        }
                        // 非致命失败只结束本轮迭代
                        result.iterations += 1;
                        continue 'iterations;
                    }
                }
            }
            result.iterations += 1;
        }
        Ok(())
    }
}
