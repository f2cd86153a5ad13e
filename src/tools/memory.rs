//! 记忆工具：store_memory 写入笔记，recall_memory 按关键词检索

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::MemoryStore;
use crate::tools::{ParamType, Tool, ToolError, ToolParameter};
use crate::workflow::TaskContext;

pub struct StoreMemoryTool {
    store: Arc<MemoryStore>,
}

impl StoreMemoryTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StoreMemoryTool {
    fn id(&self) -> &str {
        "store_memory"
    }

    fn name(&self) -> &str {
        "Remember"
    }

    fn description(&self) -> &str {
        "Store a note in the assistant's memory for later recall."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("content", ParamType::String, "Text to remember"),
            ToolParameter::optional("tags", ParamType::Array, "Optional list of tags"),
        ]
    }

    async fn execute(&self, params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        let content = params["content"].as_str().unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ToolError::InvalidParams("content must not be empty".into()));
        }
        let tags = params["tags"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let entry = self.store.add(content, tags);
        Ok(json!({ "stored": true, "memory_id": entry.id }))
    }

    fn estimate_duration(&self, _params: &Value) -> u64 {
        100
    }
}

pub struct RecallMemoryTool {
    store: Arc<MemoryStore>,
}

impl RecallMemoryTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for RecallMemoryTool {
    fn id(&self) -> &str {
        "recall_memory"
    }

    fn name(&self) -> &str {
        "Recall"
    }

    fn description(&self) -> &str {
        "Search previously stored notes by keywords."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", ParamType::String, "What to look for"),
            ToolParameter::optional("limit", ParamType::Number, "Maximum number of notes")
                .with_default(json!(3)),
        ]
    }

    async fn execute(&self, params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        let query = params["query"].as_str().unwrap_or_default();
        let limit = params["limit"].as_u64().unwrap_or(3).max(1) as usize;
        let hits = self.store.search(query, limit);
        Ok(json!({ "query": query, "count": hits.len(), "memories": hits }))
    }

    fn estimate_duration(&self, _params: &Value) -> u64 {
        200
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_recall() {
        let store = Arc::new(MemoryStore::default());
        let ctx = TaskContext::default();
        StoreMemoryTool::new(store.clone())
            .execute(&json!({"content": "Spare key is under the blue pot"}), &ctx)
            .await
            .unwrap();

        let out = RecallMemoryTool::new(store)
            .execute(&json!({"query": "where is the spare key", "limit": 3}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["memories"][0]["content"], "Spare key is under the blue pot");
    }

    #[tokio::test]
    async fn test_store_rejects_blank() {
        let tool = StoreMemoryTool::new(Arc::new(MemoryStore::default()));
        let err = tool
            .execute(&json!({"content": "  "}), &TaskContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
