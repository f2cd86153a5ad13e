//! 编排器错误类型
//!
//! OrchestratorError 面向调用方（创建 / 查询 / 规划失败）；TaskError 只在任务执行器内部出现，
//! 会被转换为任务状态与事件，不会越过编排器的执行循环。

use thiserror::Error;

use crate::llm::LlmError;
use crate::tools::ToolError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Goal not found: {0}")]
    GoalNotFound(String),

    #[error("Task {task_id} not found in goal {goal_id}")]
    TaskNotFound { goal_id: String, task_id: String },

    #[error("Task {task_id} depends on unknown task {dependency}")]
    UnknownDependency { task_id: String, dependency: String },

    /// 存在环或无法满足的依赖：分组只覆盖了部分任务
    #[error("Unsatisfiable dependencies: only {planned} of {total} tasks could be scheduled")]
    UnsatisfiableDependencies { planned: usize, total: usize },

    #[error("Plan contains no tasks")]
    EmptyPlan,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// 单次任务尝试失败的原因
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Tool not registered: {0}")]
    ToolNotRegistered(String),

    #[error("Fallback generation failed: {0}")]
    Llm(#[from] LlmError),
}
