//! 目标生命周期事件：通过 broadcast 通道推送给订阅者（UI / CLI / 测试）

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::workflow::{GoalId, TaskId};

/// 生命周期事件（序列化为带 type 字段的 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalEvent {
    GoalCreated {
        goal_id: GoalId,
        description: String,
        task_count: usize,
        estimated_duration_ms: u64,
    },
    TaskStarted {
        goal_id: GoalId,
        task_id: TaskId,
        /// 第几次尝试，从 1 开始
        attempt: u32,
    },
    TaskCompleted {
        goal_id: GoalId,
        task_id: TaskId,
        result: Value,
    },
    /// 重试耗尽
    TaskFailed {
        goal_id: GoalId,
        task_id: TaskId,
        error: String,
        attempts: u32,
    },
    TaskRetrying {
        goal_id: GoalId,
        task_id: TaskId,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    ProgressUpdate {
        goal_id: GoalId,
        progress: u8,
        completed: usize,
        total: usize,
    },
    GoalCompleted {
        goal_id: GoalId,
    },
    /// failed_tasks 与 error 至少一个有值：前者为任务失败，后者为执行过程出错
    GoalFailed {
        goal_id: GoalId,
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_tasks: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    GoalCancelled {
        goal_id: GoalId,
    },
}

impl GoalEvent {
    pub fn goal_id(&self) -> &str {
        match self {
            Self::GoalCreated { goal_id, .. }
            | Self::TaskStarted { goal_id, .. }
            | Self::TaskCompleted { goal_id, .. }
            | Self::TaskFailed { goal_id, .. }
            | Self::TaskRetrying { goal_id, .. }
            | Self::ProgressUpdate { goal_id, .. }
            | Self::GoalCompleted { goal_id }
            | Self::GoalFailed { goal_id, .. }
            | Self::GoalCancelled { goal_id } => goal_id,
        }
    }

    /// 事件类型名，与 JSON 中的 type 字段一致
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GoalCreated { .. } => "goal_created",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskRetrying { .. } => "task_retrying",
            Self::ProgressUpdate { .. } => "progress_update",
            Self::GoalCompleted { .. } => "goal_completed",
            Self::GoalFailed { .. } => "goal_failed",
            Self::GoalCancelled { .. } => "goal_cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::GoalCompleted { .. } | Self::GoalFailed { .. } | Self::GoalCancelled { .. }
        )
    }
}

/// 事件总线；没有订阅者时发送被丢弃
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GoalEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: GoalEvent) {
        tracing::trace!(event = event.kind(), goal = %event.goal_id(), "Event emitted");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GoalEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
