//! Mock LLM 客户端（用于离线运行与测试，无需 API）
//!
//! 取最后一条 User 消息原样回显；分解器拿到非 JSON 输出时会退化为单任务，正好覆盖离线场景。

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Mock response: {last_user}"))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
