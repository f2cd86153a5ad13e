//! 任务调度：用 Semaphore 限制同时执行的任务数
//!
//! 同一个编排器下的所有目标共享一个调度器；任务在整个执行过程（含重试等待）中持有许可。
//! 修改上限时替换 Semaphore，已发出的许可归还到旧 Semaphore，不影响新上限。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::OrchestratorError;

pub struct TaskScheduler {
    semaphore: RwLock<Arc<Semaphore>>,
    limit: AtomicUsize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tasks: usize) -> Self {
        let limit = max_concurrent_tasks.max(1);
        Self {
            semaphore: RwLock::new(Arc::new(Semaphore::new(limit))),
            limit: AtomicUsize::new(limit),
        }
    }

    /// 获取任务执行许可
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, OrchestratorError> {
        let semaphore = self
            .semaphore
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        semaphore
            .acquire_owned()
            .await
            .map_err(|e| OrchestratorError::Internal(format!("task scheduler closed: {e}")))
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.semaphore
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .available_permits()
    }

    /// 调整并发上限，对之后申请的许可生效
    pub fn resize(&self, max_concurrent_tasks: usize) {
        let limit = max_concurrent_tasks.max(1);
        if self.limit.swap(limit, Ordering::Relaxed) == limit {
            return;
        }
        *self.semaphore.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(Semaphore::new(limit));
        tracing::info!(limit, "Task concurrency limit updated");
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
