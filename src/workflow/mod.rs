//! 目标 / 任务数据模型、依赖图与执行规划

pub mod graph;
pub mod planner;
pub mod types;

pub use graph::{parallel_groups, validate_dependencies};
pub use planner::{task_id, ExecutionPlanner, FALLBACK_ESTIMATE_MS};
pub use types::*;
