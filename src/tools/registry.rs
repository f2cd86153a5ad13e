//! 工具注册表
//!
//! 所有工具实现 Tool trait（id / 描述 / 参数声明 / execute / 耗时估计），由 ToolRegistry 按 id 注册与查找。
//! 注册表在进程生命周期内只增不删；同 id 重复注册时后者覆盖前者。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::tools::schema::{validate_params, ToolDescriptor, ToolParameter};
use crate::workflow::TaskContext;

/// 工具执行错误
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool unavailable: {0}")]
    Unavailable(String),
}

/// 工具 trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// 唯一标识（工具选择器返回的 tool 字段）
    fn id(&self) -> &str;

    /// 展示名称
    fn name(&self) -> &str;

    /// 工具描述（供工具选择器理解功能）
    fn description(&self) -> &str;

    /// 参数声明，默认无参数
    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    /// 执行工具；params 已经过校验并补全默认值，context 为当前目标的共享上下文快照
    async fn execute(&self, params: &Value, context: &TaskContext) -> Result<Value, ToolError>;

    /// 预计耗时（毫秒）
    fn estimate_duration(&self, _params: &Value) -> u64 {
        1000
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            id: self.id().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    fn validate(&self, params: &Value) -> Result<Value, ToolError> {
        validate_params(&self.parameters(), params)
    }
}

/// 工具注册表：按 id 存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        let id = tool.id().to_string();
        let replaced = self
            .tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tool)
            .is_some();
        tracing::info!(tool = %id, replaced, "Tool registered");
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// 所有工具，按 id 排序
    pub fn get_all(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<_> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.id().cmp(b.id()));
        tools
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.get_all().iter().map(|t| t.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
