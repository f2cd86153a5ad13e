//! 执行规划器：步骤描述 -> 带依赖、执行方式与耗时估计的任务列表
//!
//! 规划是确定性的：任务 ID 为 `{goal_id}_task_{index}`，同样的输入与工具选择得到同样的计划。

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::OrchestratorError;
use crate::intent::ToolSelector;
use crate::tools::ToolRegistry;
use crate::workflow::graph::{parallel_groups, validate_dependencies};
use crate::workflow::{AgentTask, ExecutionMode, ExecutionPlan, TaskSpec};

/// 没有工具时（交给模型完成）的默认耗时估计，毫秒
pub const FALLBACK_ESTIMATE_MS: u64 = 5000;

pub fn task_id(goal_id: &str, index: usize) -> String {
    format!("{goal_id}_task_{index}")
}

pub struct ExecutionPlanner {
    registry: Arc<ToolRegistry>,
    selector: Arc<dyn ToolSelector>,
}

impl ExecutionPlanner {
    pub fn new(registry: Arc<ToolRegistry>, selector: Arc<dyn ToolSelector>) -> Self {
        Self { registry, selector }
    }

    /// 线性计划：每个任务依赖上一个
    pub async fn plan(
        &self,
        goal_id: &str,
        descriptions: Vec<String>,
        original_request: &str,
        max_retries: u32,
    ) -> Result<ExecutionPlan, OrchestratorError> {
        let steps = descriptions.into_iter().map(TaskSpec::new).collect();
        self.plan_steps(goal_id, steps, original_request, max_retries)
            .await
    }

    /// 按步骤声明的依赖规划；depends_on 为 None 时依赖上一步
    pub async fn plan_steps(
        &self,
        goal_id: &str,
        steps: Vec<TaskSpec>,
        original_request: &str,
        max_retries: u32,
    ) -> Result<ExecutionPlan, OrchestratorError> {
        if steps.is_empty() {
            return Err(OrchestratorError::EmptyPlan);
        }
        tracing::debug!(goal = %goal_id, request = %original_request, steps = steps.len(), "Planning goal");

        let catalog = self.registry.descriptors();
        let mut tasks = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let id = task_id(goal_id, index);
            let mut task = AgentTask::new(id.clone(), step.description.clone(), max_retries);

            let deps: Vec<usize> = match &step.depends_on {
                Some(indices) => indices.clone(),
                None => index.checked_sub(1).into_iter().collect(),
            };
            for dep in deps {
                if dep >= steps.len() || dep == index {
                    return Err(OrchestratorError::UnknownDependency {
                        task_id: id,
                        dependency: task_id(goal_id, dep),
                    });
                }
                task = task.with_dependency(task_id(goal_id, dep));
            }

            let selection = match self.selector.select(&step.description, &catalog).await {
                Ok(selection) => selection,
                Err(e) => {
                    tracing::warn!(task = %task.id, error = %e, "Tool selection failed, using fallback");
                    None
                }
            };

            match selection {
                Some(sel) => match self.registry.get(&sel.tool_id) {
                    Some(tool) => {
                        task.estimated_duration_ms = tool.estimate_duration(&sel.params);
                        task.execution = ExecutionMode::Tool {
                            tool_id: sel.tool_id,
                            params: sel.params,
                        };
                    }
                    None => {
                        tracing::warn!(
                            task = %task.id,
                            tool = %sel.tool_id,
                            "Selected tool is not registered, using fallback"
                        );
                        task.estimated_duration_ms = FALLBACK_ESTIMATE_MS;
                    }
                },
                None => task.estimated_duration_ms = FALLBACK_ESTIMATE_MS,
            }

            tracing::debug!(
                task = %task.id,
                tool = task.tool_id().unwrap_or("fallback"),
                deps = ?task.dependencies,
                "Task planned"
            );
            tasks.push(task);
        }

        validate_dependencies(&tasks)?;
        let groups = parallel_groups(&tasks);
        let planned: usize = groups.iter().map(Vec::len).sum();
        if planned != tasks.len() {
            return Err(OrchestratorError::UnsatisfiableDependencies {
                planned,
                total: tasks.len(),
            });
        }

        // 组内并行取最大值，组间串行求和
        let estimated_duration_ms = groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter_map(|id| tasks.iter().find(|t| &t.id == id))
                    .map(|t| t.estimated_duration_ms)
                    .max()
                    .unwrap_or(0)
            })
            .sum();

        let required_tools: BTreeSet<String> = tasks
            .iter()
            .filter_map(|t| t.tool_id().map(String::from))
            .collect();

        Ok(ExecutionPlan {
            goal_id: goal_id.to_string(),
            tasks,
            parallel_groups: groups,
            estimated_duration_ms,
            required_tools,
        })
    }
}
