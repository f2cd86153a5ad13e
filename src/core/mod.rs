//! 编排核心：目标表、事件、任务执行与调度、进度通知、保留策略与主控状态机

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod progress;
pub mod retention;
pub mod store;
pub mod task_executor;
pub mod task_scheduler;

pub use builder::OrchestratorBuilder;
pub use error::{OrchestratorError, TaskError};
pub use events::{EventBus, GoalEvent};
pub use orchestrator::{GoalOrchestrator, GoalRequest};
pub use progress::{NotifierGuard, ProgressNotifier};
pub use retention::RetentionPolicy;
pub use store::{GoalStore, ProgressSnapshot};
pub use task_executor::{
    FallbackStrategy, RetryPolicy, TaskExecutor, TaskOutcome, TaskStrategy, ToolStrategy,
};
pub use task_scheduler::TaskScheduler;
