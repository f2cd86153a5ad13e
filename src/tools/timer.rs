//! 计时器工具（set_timer）
//!
//! 每个计时器是一个 tokio 后台任务，到点时打日志；工具本身立即返回计时器 id 与触发时间。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{ParamType, Tool, ToolError, ToolParameter};
use crate::workflow::TaskContext;

/// 单个计时器的上限：24 小时
const MAX_TIMER_SECS: f64 = 86_400.0;

#[derive(Default)]
pub struct TimerTool {
    next_id: AtomicU64,
}

impl TimerTool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for TimerTool {
    fn id(&self) -> &str {
        "set_timer"
    }

    fn name(&self) -> &str {
        "Timer"
    }

    fn description(&self) -> &str {
        "Start a countdown timer that fires after the given number of seconds."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("seconds", ParamType::Number, "Countdown length in seconds"),
            ToolParameter::optional("label", ParamType::String, "What the timer is for")
                .with_default(json!("timer")),
        ]
    }

    async fn execute(&self, params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        let seconds = params["seconds"].as_f64().unwrap_or(0.0);
        if !(seconds > 0.0 && seconds <= MAX_TIMER_SECS) {
            return Err(ToolError::InvalidParams(format!(
                "seconds must be in (0, {MAX_TIMER_SECS}], got {seconds}"
            )));
        }
        let label = params["label"].as_str().unwrap_or("timer").to_string();
        let timer_id = format!("timer_{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let fires_at = chrono::Utc::now() + chrono::Duration::milliseconds((seconds * 1000.0) as i64);

        let id = timer_id.clone();
        let label_for_task = label.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
            tracing::info!(timer = %id, label = %label_for_task, "Timer fired");
        });

        Ok(json!({
            "timer_id": timer_id,
            "label": label,
            "seconds": seconds,
            "fires_at": fires_at.to_rfc3339(),
        }))
    }

    fn estimate_duration(&self, _params: &Value) -> u64 {
        50
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timer_ids_increment() {
        let tool = TimerTool::new();
        let ctx = TaskContext::default();
        let a = tool.execute(&json!({"seconds": 5, "label": "tea"}), &ctx).await.unwrap();
        let b = tool.execute(&json!({"seconds": 5}), &ctx).await.unwrap();
        assert_eq!(a["timer_id"], "timer_1");
        assert_eq!(b["timer_id"], "timer_2");
        assert_eq!(a["label"], "tea");
    }

    #[tokio::test]
    async fn test_timer_rejects_out_of_range() {
        let tool = TimerTool::new();
        let err = tool
            .execute(&json!({"seconds": 0}), &TaskContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
