//! 进度通知：每个执行中的目标一个周期定时器
//!
//! 每次 tick 重新计算完成比例并发出 progress_update；目标进入终态或被 stop 时定时器退出。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::{EventBus, GoalEvent, GoalStore};
use crate::workflow::{GoalId, GoalStatus};

pub struct ProgressNotifier {
    store: Arc<GoalStore>,
    events: EventBus,
    timers: Arc<Mutex<HashMap<GoalId, CancellationToken>>>,
}

impl ProgressNotifier {
    pub fn new(store: Arc<GoalStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 启动定时器；同一目标重复调用无效果
    pub fn start(&self, goal_id: &str, interval_ms: u64) {
        let token = CancellationToken::new();
        {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            if timers.contains_key(goal_id) {
                return;
            }
            timers.insert(goal_id.to_string(), token.clone());
        }

        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let timers = Arc::clone(&self.timers);
        let goal_id = goal_id.to_string();
        let period = Duration::from_millis(interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(snapshot) = store.refresh_progress(&goal_id).await else {
                    break;
                };
                if snapshot.status.is_terminal() {
                    break;
                }
                if snapshot.status != GoalStatus::Executing {
                    continue;
                }
                tracing::debug!(goal = %goal_id, progress = snapshot.progress, "Progress tick");
                events.emit(GoalEvent::ProgressUpdate {
                    goal_id: goal_id.clone(),
                    progress: snapshot.progress,
                    completed: snapshot.completed,
                    total: snapshot.total,
                });
            }

            // 只清理自己的登记，避免删掉同一目标后来登记的定时器
            token.cancel();
            let mut timers = timers.lock().unwrap_or_else(PoisonError::into_inner);
            if timers.get(&goal_id).is_some_and(CancellationToken::is_cancelled) {
                timers.remove(&goal_id);
            }
        });
    }

    pub fn stop(&self, goal_id: &str) {
        if let Some(token) = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(goal_id)
        {
            token.cancel();
        }
    }

    pub fn is_running(&self, goal_id: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(goal_id)
    }

    pub fn active_count(&self) -> usize {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// 离开作用域时停止目标的定时器（包括提前返回与 panic）
pub struct NotifierGuard<'a> {
    notifier: &'a ProgressNotifier,
    goal_id: &'a str,
}

impl<'a> NotifierGuard<'a> {
    pub fn new(notifier: &'a ProgressNotifier, goal_id: &'a str) -> Self {
        Self { notifier, goal_id }
    }
}

impl Drop for NotifierGuard<'_> {
    fn drop(&mut self) {
        self.notifier.stop(self.goal_id);
    }
}
