//! JARVIS - 目标 / 任务编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 目标编排器、任务执行与调度、进度通知、事件、保留策略
//! - **intent**: 请求分解、工具选择与兜底生成（LLM 实现与离线规则实现）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 记忆存储与分词（供记忆工具使用）
//! - **observability**: 日志初始化
//! - **tools**: Tool trait、注册表、参数 Schema 与默认工具
//! - **workflow**: 目标 / 任务数据模型、依赖图与执行规划

pub mod config;
pub mod core;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod workflow;

pub use crate::core::{GoalEvent, GoalOrchestrator, GoalRequest, OrchestratorBuilder};
pub use crate::workflow::{AgentGoal, AgentTask, GoalStatus, TaskStatus};
