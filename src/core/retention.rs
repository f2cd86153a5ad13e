//! 目标保留策略
//!
//! 只淘汰终态目标：先删除完成时间超过 ttl 的，再在总数超过 max_goals 时从最早完成的开始删除。

use crate::config::RetentionSection;
use crate::workflow::{AgentGoal, GoalId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_goals: usize,
    pub ttl_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_goals: 100,
            ttl_secs: 3600,
        }
    }
}

impl From<&RetentionSection> for RetentionPolicy {
    fn from(section: &RetentionSection) -> Self {
        Self {
            max_goals: section.max_goals,
            ttl_secs: section.ttl_secs,
        }
    }
}

impl RetentionPolicy {
    /// 返回需要淘汰的目标 ID；now_ms 为毫秒时间戳
    pub fn select_evictions<'a>(
        &self,
        goals: impl IntoIterator<Item = &'a AgentGoal>,
        now_ms: i64,
    ) -> Vec<GoalId> {
        let goals: Vec<&AgentGoal> = goals.into_iter().collect();
        let ttl_ms = i64::try_from(self.ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);

        let mut terminal: Vec<&AgentGoal> = goals
            .iter()
            .copied()
            .filter(|g| g.status.is_terminal())
            .collect();
        terminal.sort_by_key(|g| (g.completed_at.unwrap_or(g.created_at), g.created_at));

        let mut evicted: Vec<GoalId> = terminal
            .iter()
            .filter(|g| now_ms.saturating_sub(g.completed_at.unwrap_or(g.created_at)) > ttl_ms)
            .map(|g| g.id.clone())
            .collect();

        let mut remaining = goals.len() - evicted.len();
        for goal in &terminal {
            if remaining <= self.max_goals {
                break;
            }
            if !evicted.contains(&goal.id) {
                evicted.push(goal.id.clone());
                remaining -= 1;
            }
        }
        evicted
    }
}
