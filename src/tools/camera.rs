//! 拍照工具（capture_image）
//!
//! 从配置的摄像头快照 URL 拉取一帧，返回大小与类型；未配置摄像头时返回 Unavailable。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::tools::{ParamType, Tool, ToolError, ToolParameter};
use crate::workflow::TaskContext;

pub struct CameraTool {
    client: Client,
    snapshot_url: Option<String>,
}

impl CameraTool {
    pub fn new(snapshot_url: Option<String>, timeout_secs: u64) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            snapshot_url,
        })
    }
}

#[async_trait]
impl Tool for CameraTool {
    fn id(&self) -> &str {
        "capture_image"
    }

    fn name(&self) -> &str {
        "Camera"
    }

    fn description(&self) -> &str {
        "Capture a still image from the configured camera."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::optional("source", ParamType::String, "Camera name")
            .with_default(json!("default"))]
    }

    async fn execute(&self, params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        let url = self
            .snapshot_url
            .as_deref()
            .ok_or_else(|| ToolError::Unavailable("no camera snapshot URL configured".into()))?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ToolError::ExecutionFailed(format!(
                "camera returned {}",
                resp.status()
            )));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(json!({
            "source": params["source"],
            "bytes": bytes.len(),
            "content_type": content_type,
            "captured_at": chrono::Utc::now().to_rfc3339(),
        }))
    }

    fn estimate_duration(&self, _params: &Value) -> u64 {
        2000
    }
}
