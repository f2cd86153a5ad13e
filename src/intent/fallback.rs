//! 兜底生成：没有合适工具的步骤交给语言模型直接回答

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

#[async_trait]
pub trait FallbackGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are JARVIS, a concise personal assistant. \
Complete the task below. Earlier results from the same request are listed after the task.";

pub struct LlmFallback {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmFallback {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

#[async_trait]
impl FallbackGenerator for LlmFallback {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let text = self
            .llm
            .complete(&[Message::system(&self.system_prompt), Message::user(prompt)])
            .await?;
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}
