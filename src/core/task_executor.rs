//! 任务执行器：把单个任务跑到完成或重试耗尽
//!
//! 执行方式在规划时确定：ExecutionMode::Tool 走 ToolStrategy，ExecutionMode::Fallback 走 FallbackStrategy。
//! 失败后 retry_count 加一，未达上限则进入 Retrying 并按指数退避等待，否则标记 Failed。
//! 目标一旦进入终态，后续的状态写入都会被 GoalStore 拒绝，执行结果随之丢弃。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::core::{EventBus, GoalEvent, GoalStore, OrchestratorError, TaskError};
use crate::intent::FallbackGenerator;
use crate::tools::ToolRegistry;
use crate::workflow::{AgentTask, ExecutionMode, SharedContext, TaskContext, TaskStatus};

/// 重试退避：delay = min(base * 2^retry_count, max)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry_count: u32) -> u64 {
        let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl From<&OrchestratorConfig> for RetryPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            base_delay_ms: config.base_retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms,
        }
    }
}

/// 单次 run_task 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// 重试耗尽
    Failed,
    /// 目标已终止，任务未执行或结果被丢弃
    Cancelled,
    /// 已完成 / 已取消，或依赖尚未满足
    Skipped,
}

/// 任务执行策略
#[async_trait]
pub trait TaskStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        goal_id: &str,
        task: &AgentTask,
        context: &TaskContext,
    ) -> Result<Value, TaskError>;
}

/// 调用已注册工具
pub struct ToolStrategy {
    registry: Arc<ToolRegistry>,
}

impl ToolStrategy {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

fn params_preview(params: &Value) -> String {
    let s = params.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[async_trait]
impl TaskStrategy for ToolStrategy {
    fn name(&self) -> &str {
        "tool"
    }

    async fn run(
        &self,
        goal_id: &str,
        task: &AgentTask,
        context: &TaskContext,
    ) -> Result<Value, TaskError> {
        let ExecutionMode::Tool { tool_id, params } = &task.execution else {
            return Err(TaskError::ToolNotRegistered("<none>".into()));
        };
        let tool = self
            .registry
            .get(tool_id)
            .ok_or_else(|| TaskError::ToolNotRegistered(tool_id.clone()))?;

        let start = Instant::now();
        let result = match tool.validate(params) {
            Ok(params) => tool.execute(&params, context).await,
            Err(e) => Err(e),
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_id,
            "goal_id": goal_id,
            "task_id": task.id,
            "ok": result.is_ok(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "params_preview": params_preview(params),
        });
        tracing::info!(audit = %audit, "tool");

        Ok(result?)
    }
}

/// 没有工具时由语言模型直接完成
pub struct FallbackStrategy {
    generator: Arc<dyn FallbackGenerator>,
}

impl FallbackStrategy {
    pub fn new(generator: Arc<dyn FallbackGenerator>) -> Self {
        Self { generator }
    }

    /// 任务描述 + 已完成任务的结果（每行 `taskId: result`）
    pub fn build_prompt(task: &AgentTask, context: &TaskContext) -> String {
        let mut prompt = task.description.clone();
        if !context.accumulated_data.is_empty() {
            prompt.push_str("\n\nResults so far:\n");
            for (task_id, result) in &context.accumulated_data {
                let text = match result {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                prompt.push_str(&format!("{task_id}: {text}\n"));
            }
        }
        prompt
    }
}

#[async_trait]
impl TaskStrategy for FallbackStrategy {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn run(
        &self,
        _goal_id: &str,
        task: &AgentTask,
        context: &TaskContext,
    ) -> Result<Value, TaskError> {
        let prompt = Self::build_prompt(task, context);
        let text = self.generator.generate(&prompt).await?;
        Ok(Value::String(text))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

enum AttemptFailure {
    Retry { retry_count: u32 },
    Exhausted { retry_count: u32 },
}

pub struct TaskExecutor {
    store: Arc<GoalStore>,
    events: EventBus,
    tool: ToolStrategy,
    fallback: FallbackStrategy,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<GoalStore>,
        events: EventBus,
        registry: Arc<ToolRegistry>,
        fallback: Arc<dyn FallbackGenerator>,
    ) -> Self {
        Self {
            store,
            events,
            tool: ToolStrategy::new(registry),
            fallback: FallbackStrategy::new(fallback),
        }
    }

    fn strategy_for(&self, task: &AgentTask) -> &dyn TaskStrategy {
        match task.execution {
            ExecutionMode::Tool { .. } => &self.tool,
            ExecutionMode::Fallback => &self.fallback,
        }
    }

    /// 执行单个任务；依赖未满足时直接返回 Skipped，由调用方保证调用时机
    pub async fn run_task(
        &self,
        goal_id: &str,
        task_id: &str,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let goal = self
            .store
            .get(goal_id)
            .await
            .ok_or_else(|| OrchestratorError::GoalNotFound(goal_id.to_string()))?;
        let task = goal
            .task(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                goal_id: goal_id.to_string(),
                task_id: task_id.to_string(),
            })?;

        if goal.status.is_terminal() {
            return Ok(TaskOutcome::Cancelled);
        }
        if matches!(task.status, TaskStatus::Completed | TaskStatus::Cancelled) {
            return Ok(TaskOutcome::Skipped);
        }
        if !goal.dependencies_met(&task) {
            tracing::debug!(goal = %goal_id, task = %task_id, "Dependencies not met, task deferred");
            return Ok(TaskOutcome::Skipped);
        }

        let context: SharedContext = goal.context.clone();
        let strategy = self.strategy_for(&task);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started = self
                .store
                .update_task(goal_id, task_id, |t| {
                    t.status = TaskStatus::Executing;
                    t.started_at = Some(now_ms());
                })
                .await?;
            if started.is_none() {
                return Ok(TaskOutcome::Cancelled);
            }
            self.events.emit(GoalEvent::TaskStarted {
                goal_id: goal_id.to_string(),
                task_id: task_id.to_string(),
                attempt,
            });

            let snapshot = context.read().await.clone();
            match strategy.run(goal_id, &task, &snapshot).await {
                Ok(result) => return self.complete(goal_id, task_id, result, &context).await,
                Err(e) => {
                    let error = e.to_string();
                    let failure = self
                        .store
                        .update_task(goal_id, task_id, |t| {
                            t.retry_count = (t.retry_count + 1).min(t.max_retries);
                            t.error = Some(error.clone());
                            if t.retry_count < t.max_retries {
                                t.status = TaskStatus::Retrying;
                                AttemptFailure::Retry {
                                    retry_count: t.retry_count,
                                }
                            } else {
                                t.status = TaskStatus::Failed;
                                t.completed_at = Some(now_ms());
                                AttemptFailure::Exhausted {
                                    retry_count: t.retry_count,
                                }
                            }
                        })
                        .await?;

                    match failure {
                        None => {
                            tracing::info!(goal = %goal_id, task = %task_id, "Goal ended while task was running, error discarded");
                            return Ok(TaskOutcome::Cancelled);
                        }
                        Some(AttemptFailure::Retry { retry_count }) => {
                            let delay_ms = retry.delay_for(retry_count);
                            tracing::warn!(
                                goal = %goal_id,
                                task = %task_id,
                                strategy = strategy.name(),
                                attempt,
                                delay_ms,
                                error = %error,
                                "Task failed, retrying"
                            );
                            self.events.emit(GoalEvent::TaskRetrying {
                                goal_id: goal_id.to_string(),
                                task_id: task_id.to_string(),
                                attempt: retry_count,
                                delay_ms,
                                error,
                            });
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                                _ = cancel.cancelled() => return Ok(TaskOutcome::Cancelled),
                            }
                        }
                        Some(AttemptFailure::Exhausted { retry_count }) => {
                            tracing::warn!(
                                goal = %goal_id,
                                task = %task_id,
                                strategy = strategy.name(),
                                attempts = attempt,
                                error = %error,
                                "Task failed, retries exhausted"
                            );
                            self.events.emit(GoalEvent::TaskFailed {
                                goal_id: goal_id.to_string(),
                                task_id: task_id.to_string(),
                                error,
                                attempts: attempt.max(retry_count),
                            });
                            return Ok(TaskOutcome::Failed);
                        }
                    }
                }
            }
        }
    }

    async fn complete(
        &self,
        goal_id: &str,
        task_id: &str,
        result: Value,
        context: &SharedContext,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let stored = result.clone();
        let applied = self
            .store
            .update_task(goal_id, task_id, |t| {
                t.status = TaskStatus::Completed;
                t.result = Some(stored);
                t.error = None;
                t.completed_at = Some(now_ms());
            })
            .await?;
        if applied.is_none() {
            tracing::info!(goal = %goal_id, task = %task_id, "Goal ended while task was running, result discarded");
            return Ok(TaskOutcome::Cancelled);
        }

        context
            .write()
            .await
            .accumulated_data
            .insert(task_id.to_string(), result.clone());
        self.store.refresh_progress(goal_id).await;

        tracing::debug!(goal = %goal_id, task = %task_id, "Task completed");
        self.events.emit(GoalEvent::TaskCompleted {
            goal_id: goal_id.to_string(),
            task_id: task_id.to_string(),
            result,
        });
        Ok(TaskOutcome::Completed)
    }
}
