//! 目标与任务的数据模型
//!
//! AgentGoal 持有按计划顺序排列的 AgentTask；TaskContext 是同一目标内所有任务共享的累积上下文，
//! ExecutionPlan 是规划器产出、编排器消费一次的临时结构。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

pub type GoalId = String;
pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待依赖满足
    Pending,
    /// 正在执行
    Executing,
    /// 已完成
    Completed,
    /// 执行失败（重试耗尽）
    Failed,
    /// 失败后等待下一次重试
    Retrying,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// 目标状态：创建即进入 Planning，没有 Pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Planning,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl GoalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// 任务优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// 任务执行方式，在规划时确定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// 调用已注册的工具
    Tool { tool_id: String, params: Value },
    /// 没有合适的工具，交给语言模型直接完成
    Fallback,
}

/// 单个目标的共享上下文：原始请求、已完成任务的结果、用户偏好与约束
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    pub original_request: String,
    /// 任务 ID -> 结果；BTreeMap 保证序列化与拼接 prompt 时顺序稳定
    pub accumulated_data: BTreeMap<TaskId, Value>,
    pub user_preferences: HashMap<String, Value>,
    pub constraints: Vec<String>,
}

impl TaskContext {
    pub fn new(original_request: impl Into<String>) -> Self {
        Self {
            original_request: original_request.into(),
            ..Self::default()
        }
    }
}

/// 分解器产出的单个步骤；depends_on 为 None 时依赖上一步，Some 时为同一列表中的下标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    #[serde(default)]
    pub depends_on: Option<Vec<usize>>,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            depends_on: None,
        }
    }

    pub fn with_dependencies(mut self, indices: Vec<usize>) -> Self {
        self.depends_on = Some(indices);
        self
    }
}

/// 目标内共享、可变的上下文句柄
pub type SharedContext = Arc<RwLock<TaskContext>>;

/// 任务：一个由工具或模型完成的原子工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    /// 预留给子任务分解，顶层任务为 None
    pub parent_id: Option<TaskId>,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub execution: ExecutionMode,
    pub dependencies: Vec<TaskId>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// 毫秒时间戳
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub estimated_duration_ms: u64,
}

impl AgentTask {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            description: description.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Normal,
            execution: ExecutionMode::Fallback,
            dependencies: Vec::new(),
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            created_at: chrono::Utc::now().timestamp_millis(),
            started_at: None,
            completed_at: None,
            estimated_duration_ms: 0,
        }
    }

    pub fn with_dependency(mut self, task_id: impl Into<TaskId>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }

    pub fn tool_id(&self) -> Option<&str> {
        match &self.execution {
            ExecutionMode::Tool { tool_id, .. } => Some(tool_id),
            ExecutionMode::Fallback => None,
        }
    }
}

/// 目标：用户请求及其分解、执行状态与进度
#[derive(Debug, Clone, Serialize)]
pub struct AgentGoal {
    pub id: GoalId,
    pub description: String,
    pub tasks: Vec<AgentTask>,
    pub status: GoalStatus,
    /// 0..=100
    pub progress: u8,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub user_id: String,
    pub session_id: Option<String>,
    /// 创建时计算的并行分组，执行时直接复用
    pub parallel_groups: Vec<Vec<TaskId>>,
    pub estimated_duration_ms: u64,
    pub required_tools: BTreeSet<String>,
    #[serde(skip)]
    pub context: SharedContext,
}

impl AgentGoal {
    pub fn task(&self, task_id: &str) -> Option<&AgentTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut AgentTask> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// floor(100 * completed / total)；没有任务时为 0
    pub fn compute_progress(&self) -> u8 {
        let total = self.tasks.len();
        if total == 0 {
            return 0;
        }
        let completed = self.count_with_status(TaskStatus::Completed);
        ((completed * 100) / total) as u8
    }

    /// 依赖是否全部完成
    pub fn dependencies_met(&self, task: &AgentTask) -> bool {
        task.dependencies.iter().all(|dep| {
            self.task(dep)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }
}

/// 规划结果，只在创建目标时使用一次
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub goal_id: GoalId,
    pub tasks: Vec<AgentTask>,
    pub parallel_groups: Vec<Vec<TaskId>>,
    pub estimated_duration_ms: u64,
    pub required_tools: BTreeSet<String>,
}

impl ExecutionPlan {
    /// 分组覆盖的任务数是否等于任务总数（不等说明存在环或无法满足的依赖）
    pub fn is_complete(&self) -> bool {
        self.parallel_groups.iter().map(Vec::len).sum::<usize>() == self.tasks.len()
    }
}
