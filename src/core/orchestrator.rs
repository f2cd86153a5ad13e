//! 目标编排器：主控状态机
//!
//! create_goal：分解请求 -> 规划 -> 以 Planning 状态存入目标 -> 后台开始执行 -> 立即返回。
//! 执行：Planning -> Executing，按并行组推进（组内可并发，受 TaskScheduler 限流），
//! 全部结束后根据失败任务数进入 Completed / Failed。取消是协作式的：已在执行的工具调用不会被中断，
//! 其结果因目标已终止而被丢弃。

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::core::progress::NotifierGuard;
use crate::core::{
    EventBus, GoalEvent, GoalStore, OrchestratorError, ProgressNotifier, RetentionPolicy,
    RetryPolicy, TaskExecutor, TaskOutcome, TaskScheduler,
};
use crate::intent::{FallbackGenerator, TaskDecomposer, ToolSelector};
use crate::tools::{Tool, ToolRegistry};
use crate::workflow::{
    AgentGoal, ExecutionPlanner, GoalId, GoalStatus, TaskContext, TaskSpec, TaskStatus,
};

/// 创建目标的请求；user_id 为 None 时使用配置中的默认用户
#[derive(Debug, Clone, Default)]
pub struct GoalRequest {
    pub text: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub preferences: HashMap<String, Value>,
    pub constraints: Vec<String>,
}

impl GoalRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: Value) -> Self {
        self.preferences.insert(key.into(), value);
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }
}

impl From<&str> for GoalRequest {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for GoalRequest {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// 后台执行句柄
struct GoalRun {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic during goal execution".to_string()
    }
}

pub struct GoalOrchestrator {
    store: Arc<GoalStore>,
    events: EventBus,
    registry: Arc<ToolRegistry>,
    decomposer: Arc<dyn TaskDecomposer>,
    planner: ExecutionPlanner,
    executor: TaskExecutor,
    scheduler: TaskScheduler,
    notifier: ProgressNotifier,
    config: RwLock<OrchestratorConfig>,
    retention: RetentionPolicy,
    default_user_id: String,
    runs: Mutex<HashMap<GoalId, GoalRun>>,
}

impl GoalOrchestrator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        decomposer: Arc<dyn TaskDecomposer>,
        selector: Arc<dyn ToolSelector>,
        fallback: Arc<dyn FallbackGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        let store = Arc::new(GoalStore::new());
        let events = EventBus::new(config.event_buffer);
        Self {
            planner: ExecutionPlanner::new(Arc::clone(&registry), selector),
            executor: TaskExecutor::new(
                Arc::clone(&store),
                events.clone(),
                Arc::clone(&registry),
                fallback,
            ),
            scheduler: TaskScheduler::new(config.max_concurrent_tasks),
            notifier: ProgressNotifier::new(Arc::clone(&store), events.clone()),
            store,
            events,
            registry,
            decomposer,
            config: RwLock::new(config),
            retention: RetentionPolicy::default(),
            default_user_id: "default".into(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_default_user(mut self, user_id: impl Into<String>) -> Self {
        self.default_user_id = user_id.into();
        self
    }

    // ---------- 配置 ----------

    pub fn config(&self) -> OrchestratorConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 修改运行时配置；重试延迟与并行开关在下一次使用时生效，并发上限立即替换
    pub fn update_config(&self, f: impl FnOnce(&mut OrchestratorConfig)) -> OrchestratorConfig {
        let updated = {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut config);
            config.clone()
        };
        self.scheduler.resize(updated.max_concurrent_tasks);
        tracing::info!(config = ?updated, "Orchestrator config updated");
        updated
    }

    // ---------- 工具 ----------

    pub fn register_tool(&self, tool: impl Tool + 'static) {
        self.registry.register(tool);
    }

    pub fn register_tool_arc(&self, tool: Arc<dyn Tool>) {
        self.registry.register_arc(tool);
    }

    pub fn get_all_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.registry.get_all()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    // ---------- 查询与订阅 ----------

    pub async fn get_goal(&self, goal_id: &str) -> Option<AgentGoal> {
        self.store.get(goal_id).await
    }

    pub async fn get_all_goals(&self) -> Vec<AgentGoal> {
        self.store.all().await
    }

    pub async fn get_active_goals(&self) -> Vec<AgentGoal> {
        self.store.active().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GoalEvent> {
        self.events.subscribe()
    }

    // ---------- 生命周期 ----------

    /// 创建目标并在后台开始执行，立即返回 Planning 状态的快照
    ///
    /// 分解失败时整个请求作为单个任务；依赖无法满足（环）时返回错误，目标不会被保存。
    pub async fn create_goal(
        self: &Arc<Self>,
        request: impl Into<GoalRequest>,
    ) -> Result<AgentGoal, OrchestratorError> {
        let request = request.into();
        let text = request.text.trim().to_string();
        if text.is_empty() {
            return Err(OrchestratorError::EmptyPlan);
        }

        let goal_id = format!("goal_{}", Uuid::new_v4().simple());
        let config = self.config();

        let steps = match self.decomposer.decompose_steps(&text).await {
            Ok(steps) if !steps.is_empty() => steps,
            Ok(_) => {
                tracing::warn!(goal = %goal_id, "Decomposer returned no steps, using the request as a single task");
                vec![TaskSpec::new(text.clone())]
            }
            Err(e) => {
                tracing::warn!(goal = %goal_id, error = %e, "Decomposition failed, using the request as a single task");
                vec![TaskSpec::new(text.clone())]
            }
        };

        // 分解结果引用了不存在的步骤时按分解失败处理；环仍然是致命错误
        let plan = match self
            .planner
            .plan_steps(&goal_id, steps, &text, config.max_retries)
            .await
        {
            Err(OrchestratorError::UnknownDependency { task_id, dependency }) => {
                tracing::warn!(
                    goal = %goal_id,
                    task = %task_id,
                    dependency = %dependency,
                    "Decomposed steps reference an unknown step, using the request as a single task"
                );
                self.planner
                    .plan_steps(
                        &goal_id,
                        vec![TaskSpec::new(text.clone())],
                        &text,
                        config.max_retries,
                    )
                    .await?
            }
            result => result?,
        };

        let mut context = TaskContext::new(text.clone());
        context.user_preferences = request.preferences;
        context.constraints = request.constraints;

        let goal = AgentGoal {
            id: goal_id.clone(),
            description: text,
            tasks: plan.tasks,
            status: GoalStatus::Planning,
            progress: 0,
            created_at: now_ms(),
            completed_at: None,
            user_id: request
                .user_id
                .unwrap_or_else(|| self.default_user_id.clone()),
            session_id: request.session_id,
            parallel_groups: plan.parallel_groups,
            estimated_duration_ms: plan.estimated_duration_ms,
            required_tools: plan.required_tools,
            context: Arc::new(tokio::sync::RwLock::new(context)),
        };

        self.store.insert(goal.clone()).await;
        tracing::info!(
            goal = %goal_id,
            tasks = goal.tasks.len(),
            groups = goal.parallel_groups.len(),
            estimated_ms = goal.estimated_duration_ms,
            tools = ?goal.required_tools,
            "Goal created"
        );
        self.events.emit(GoalEvent::GoalCreated {
            goal_id: goal_id.clone(),
            description: goal.description.clone(),
            task_count: goal.tasks.len(),
            estimated_duration_ms: goal.estimated_duration_ms,
        });

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                goal_id.clone(),
                GoalRun {
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute_goal(&goal_id, &cancel).await;
            let _ = done_tx.send(true);
            // 刚结束的目标留给下一次清理，避免与 wait_for_goal 竞争
            this.evict_finished(Some(&goal_id)).await;
        });

        Ok(goal)
    }

    /// 执行目标直到终态；任何错误或 panic 都转换为 goal_failed
    async fn execute_goal(&self, goal_id: &str, cancel: &CancellationToken) {
        let started = Instant::now();
        let _notifier = NotifierGuard::new(&self.notifier, goal_id);

        let result = AssertUnwindSafe(self.drive_goal(goal_id, cancel))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail_goal(goal_id, e.to_string()).await,
            Err(payload) => self.fail_goal(goal_id, panic_message(payload)).await,
        }

        let budget_ms = self.config().goal_timeout_ms;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > budget_ms {
            tracing::warn!(goal = %goal_id, elapsed_ms, budget_ms, "Goal exceeded its time budget");
        }
    }

    async fn drive_goal(
        &self,
        goal_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let groups = self
            .store
            .update_goal(goal_id, |g| {
                if g.status != GoalStatus::Planning {
                    return None;
                }
                g.status = GoalStatus::Executing;
                Some(g.parallel_groups.clone())
            })
            .await?;
        let Some(groups) = groups else {
            return Ok(());
        };

        self.notifier
            .start(goal_id, self.config().progress_interval_ms);
        tracing::info!(goal = %goal_id, groups = groups.len(), "Goal executing");

        for group in &groups {
            if cancel.is_cancelled() || !self.is_executing(goal_id).await {
                break;
            }
            let config = self.config();
            let retry = RetryPolicy::from(&config);

            if group.len() > 1 && config.enable_parallel_execution {
                let runs = group
                    .iter()
                    .map(|task_id| self.run_scheduled(goal_id, task_id, retry, cancel));
                for outcome in join_all(runs).await {
                    outcome?;
                }
            } else {
                for task_id in group {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.run_scheduled(goal_id, task_id, retry, cancel).await?;
                }
            }
        }

        self.finish_goal(goal_id).await
    }

    async fn run_scheduled(
        &self,
        goal_id: &str,
        task_id: &str,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let _permit = tokio::select! {
            permit = self.scheduler.acquire() => permit?,
            _ = cancel.cancelled() => return Ok(TaskOutcome::Cancelled),
        };
        self.executor.run_task(goal_id, task_id, retry, cancel).await
    }

    async fn is_executing(&self, goal_id: &str) -> bool {
        self.store.status(goal_id).await == Some(GoalStatus::Executing)
    }

    /// 所有组处理完后的终态迁移；目标已被外部终止时不做任何事
    async fn finish_goal(&self, goal_id: &str) -> Result<(), OrchestratorError> {
        let terminal = self
            .store
            .update_goal(goal_id, |g| {
                if g.status.is_terminal() {
                    return None;
                }
                let failed = g.count_with_status(TaskStatus::Failed);
                g.completed_at = Some(now_ms());
                if failed == 0 {
                    g.status = GoalStatus::Completed;
                    g.progress = 100;
                } else {
                    g.status = GoalStatus::Failed;
                }
                Some(failed)
            })
            .await?;

        match terminal {
            None => {}
            Some(0) => {
                tracing::info!(goal = %goal_id, "Goal completed");
                self.events.emit(GoalEvent::GoalCompleted {
                    goal_id: goal_id.to_string(),
                });
            }
            Some(failed) => {
                tracing::info!(goal = %goal_id, failed_tasks = failed, "Goal failed");
                self.events.emit(GoalEvent::GoalFailed {
                    goal_id: goal_id.to_string(),
                    failed_tasks: Some(failed),
                    error: None,
                });
            }
        }
        Ok(())
    }

    async fn fail_goal(&self, goal_id: &str, error: String) {
        let transitioned = self
            .store
            .update_goal(goal_id, |g| {
                if g.status.is_terminal() {
                    return false;
                }
                g.status = GoalStatus::Failed;
                g.completed_at = Some(now_ms());
                true
            })
            .await
            .unwrap_or(false);

        tracing::error!(goal = %goal_id, error = %error, "Goal execution error");
        if transitioned {
            self.events.emit(GoalEvent::GoalFailed {
                goal_id: goal_id.to_string(),
                failed_tasks: None,
                error: Some(error),
            });
        }
    }

    /// 取消目标：未结束的任务全部标记为 Cancelled；正在执行的工具调用继续运行但结果会被丢弃
    ///
    /// 未知目标返回 false；对已终止的目标重复调用是无操作并返回 true。
    pub async fn cancel_goal(&self, goal_id: &str) -> bool {
        let first = self
            .store
            .update_goal(goal_id, |g| {
                if g.status.is_terminal() {
                    return false;
                }
                let now = now_ms();
                g.status = GoalStatus::Cancelled;
                g.completed_at = Some(now);
                for task in &mut g.tasks {
                    if matches!(
                        task.status,
                        TaskStatus::Pending | TaskStatus::Executing | TaskStatus::Retrying
                    ) {
                        task.status = TaskStatus::Cancelled;
                        task.completed_at = Some(now);
                    }
                }
                true
            })
            .await;

        match first {
            Err(_) => false,
            Ok(false) => true,
            Ok(true) => {
                if let Some(run) = self
                    .runs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(goal_id)
                {
                    run.cancel.cancel();
                }
                self.notifier.stop(goal_id);
                tracing::info!(goal = %goal_id, "Goal cancelled");
                self.events.emit(GoalEvent::GoalCancelled {
                    goal_id: goal_id.to_string(),
                });
                true
            }
        }
    }

    /// 取消所有活跃目标，返回被取消的数量
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for goal in self.store.active().await {
            if self.cancel_goal(&goal.id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// 等待目标的后台执行结束并返回最终快照
    pub async fn wait_for_goal(&self, goal_id: &str) -> Result<AgentGoal, OrchestratorError> {
        let done = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(goal_id)
            .map(|run| run.done.clone());

        if let Some(mut done) = done {
            // 发送端被丢弃也视为结束
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.store
            .get(goal_id)
            .await
            .ok_or_else(|| OrchestratorError::GoalNotFound(goal_id.to_string()))
    }

    // ---------- 保留策略 ----------

    /// 按保留策略淘汰终态目标，返回被删除的 ID
    pub async fn cleanup_goals(&self) -> Vec<GoalId> {
        self.evict_finished(None).await
    }

    async fn evict_finished(&self, keep: Option<&str>) -> Vec<GoalId> {
        let now = now_ms();
        let policy = self.retention;
        let evict: HashSet<GoalId> = self
            .store
            .inspect(|goals| policy.select_evictions(goals.values(), now))
            .await
            .into_iter()
            .filter(|id| Some(id.as_str()) != keep)
            .collect();
        if evict.is_empty() {
            return Vec::new();
        }

        let removed = self
            .store
            .remove_where(|g| g.status.is_terminal() && evict.contains(&g.id))
            .await;
        self.forget_runs(&removed);
        tracing::debug!(count = removed.len(), "Evicted finished goals");
        removed
    }

    /// 删除一个终态目标；活跃或未知目标返回 false
    pub async fn remove_goal(&self, goal_id: &str) -> bool {
        let removed = self
            .store
            .remove_where(|g| g.id == goal_id && g.status.is_terminal())
            .await;
        self.forget_runs(&removed);
        !removed.is_empty()
    }

    fn forget_runs(&self, goal_ids: &[GoalId]) {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        for id in goal_ids {
            runs.remove(id);
        }
    }
}
