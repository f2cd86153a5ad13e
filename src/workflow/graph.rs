//! 任务依赖图
//!
//! 校验依赖是否都指向同一目标内的任务，并按拓扑层次把任务切分为并行组：
//! 每一轮收集依赖已全部处理的任务作为一组，直到全部处理完或某一轮没有可选任务（环 / 无法满足）。

use std::collections::HashSet;

use crate::core::OrchestratorError;
use crate::workflow::types::{AgentTask, TaskId};

/// 检查每个依赖 ID 都能在任务列表中找到
pub fn validate_dependencies(tasks: &[AgentTask]) -> Result<(), OrchestratorError> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(OrchestratorError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

/// 拓扑分层；组内顺序与任务列表顺序一致
///
/// 遇到环时提前返回已经得到的分组，调用方需比较分组覆盖的任务数与任务总数。
pub fn parallel_groups(tasks: &[AgentTask]) -> Vec<Vec<TaskId>> {
    let mut processed: HashSet<&str> = HashSet::with_capacity(tasks.len());
    let mut groups = Vec::new();

    while processed.len() < tasks.len() {
        let group: Vec<&AgentTask> = tasks
            .iter()
            .filter(|t| !processed.contains(t.id.as_str()))
            .filter(|t| t.dependencies.iter().all(|d| processed.contains(d.as_str())))
            .collect();

        if group.is_empty() {
            tracing::warn!(
                remaining = tasks.len() - processed.len(),
                "Dependency graph has no eligible tasks left (cycle or unsatisfiable dependency)"
            );
            break;
        }

        for task in &group {
            processed.insert(task.id.as_str());
        }
        groups.push(group.into_iter().map(|t| t.id.clone()).collect());
    }

    groups
}
