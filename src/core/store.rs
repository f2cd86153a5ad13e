//! 目标表：进程内存中的所有目标
//!
//! 目标进入终态后，update_task 不再修改其中任何任务（返回 Ok(None)），
//! 因此取消后才返回的任务结果会被丢弃。

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::core::OrchestratorError;
use crate::workflow::{AgentGoal, AgentTask, GoalId, GoalStatus, TaskStatus};

/// refresh_progress 的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub status: GoalStatus,
    pub progress: u8,
    pub completed: usize,
    pub total: usize,
}

#[derive(Default)]
pub struct GoalStore {
    goals: RwLock<HashMap<GoalId, AgentGoal>>,
}

impl GoalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, goal: AgentGoal) {
        self.goals.write().await.insert(goal.id.clone(), goal);
    }

    pub async fn get(&self, goal_id: &str) -> Option<AgentGoal> {
        self.goals.read().await.get(goal_id).cloned()
    }

    pub async fn status(&self, goal_id: &str) -> Option<GoalStatus> {
        self.goals.read().await.get(goal_id).map(|g| g.status)
    }

    /// 按创建时间排序
    pub async fn all(&self) -> Vec<AgentGoal> {
        let mut goals: Vec<AgentGoal> = self.goals.read().await.values().cloned().collect();
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        goals
    }

    pub async fn active(&self) -> Vec<AgentGoal> {
        let mut goals = self.all().await;
        goals.retain(|g| g.status.is_active());
        goals
    }

    /// 在写锁内修改目标（不检查终态，目标级状态迁移自行判断）
    pub async fn update_goal<R>(
        &self,
        goal_id: &str,
        f: impl FnOnce(&mut AgentGoal) -> R,
    ) -> Result<R, OrchestratorError> {
        let mut goals = self.goals.write().await;
        let goal = goals
            .get_mut(goal_id)
            .ok_or_else(|| OrchestratorError::GoalNotFound(goal_id.to_string()))?;
        Ok(f(goal))
    }

    /// 在写锁内修改任务；目标已是终态时不调用 f，返回 Ok(None)
    pub async fn update_task<R>(
        &self,
        goal_id: &str,
        task_id: &str,
        f: impl FnOnce(&mut AgentTask) -> R,
    ) -> Result<Option<R>, OrchestratorError> {
        let mut goals = self.goals.write().await;
        let goal = goals
            .get_mut(goal_id)
            .ok_or_else(|| OrchestratorError::GoalNotFound(goal_id.to_string()))?;
        if goal.status.is_terminal() {
            return Ok(None);
        }
        let task = goal
            .task_mut(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                goal_id: goal_id.to_string(),
                task_id: task_id.to_string(),
            })?;
        Ok(Some(f(task)))
    }

    /// 重新计算进度；执行中的目标只增不减
    pub async fn refresh_progress(&self, goal_id: &str) -> Option<ProgressSnapshot> {
        let mut goals = self.goals.write().await;
        let goal = goals.get_mut(goal_id)?;
        if goal.status == GoalStatus::Executing {
            goal.progress = goal.progress.max(goal.compute_progress());
        }
        Some(ProgressSnapshot {
            status: goal.status,
            progress: goal.progress,
            completed: goal.count_with_status(TaskStatus::Completed),
            total: goal.tasks.len(),
        })
    }

    /// 删除 f 返回 true 的目标，返回被删除的 ID
    pub async fn remove_where(&self, mut f: impl FnMut(&AgentGoal) -> bool) -> Vec<GoalId> {
        let mut goals = self.goals.write().await;
        let ids: Vec<GoalId> = goals
            .values()
            .filter(|g| f(g))
            .map(|g| g.id.clone())
            .collect();
        for id in &ids {
            goals.remove(id);
        }
        ids
    }

    /// 在读锁内对所有目标求值
    pub async fn inspect<R>(&self, f: impl FnOnce(&HashMap<GoalId, AgentGoal>) -> R) -> R {
        f(&*self.goals.read().await)
    }
}
