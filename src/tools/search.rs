//! 网络搜索工具（web_search）
//!
//! 调用 DuckDuckGo Instant Answer 风格的 JSON 接口（可配置端点）；GET 带超时与 User-Agent，
//! 结果超过 max_result_chars 时截断并追加 ...[truncated]。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::tools::{ParamType, Tool, ToolError, ToolParameter};
use crate::workflow::TaskContext;

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.duckduckgo.com/";

pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    max_result_chars: usize,
}

impl WebSearchTool {
    pub fn new(endpoint: &str, timeout_secs: u64, max_result_chars: usize) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("jarvis/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            max_result_chars,
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...[truncated]", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 从 Instant Answer 响应中提取摘要与相关主题
fn summarize(body: &Value) -> (String, Vec<String>) {
    let abstract_text = ["AbstractText", "Answer", "Definition"]
        .iter()
        .filter_map(|k| body[*k].as_str())
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string();

    let related = body["RelatedTopics"]
        .as_array()
        .map(|topics| {
            topics
                .iter()
                .filter_map(|t| t["Text"].as_str())
                .take(5)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    (abstract_text, related)
}

#[async_trait]
impl Tool for WebSearchTool {
    fn id(&self) -> &str {
        "web_search"
    }

    fn name(&self) -> &str {
        "Web search"
    }

    fn description(&self) -> &str {
        "Look up a short factual answer and related topics on the web."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required("query", ParamType::String, "Search query")]
    }

    async fn execute(&self, params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        let query = params["query"].as_str().unwrap_or_default().trim();
        if query.is_empty() {
            return Err(ToolError::InvalidParams("query must not be empty".into()));
        }

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ToolError::ExecutionFailed(format!(
                "search endpoint returned {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let (summary, related) = summarize(&body);
        Ok(json!({
            "query": query,
            "summary": truncate(&summary, self.max_result_chars),
            "related": related,
        }))
    }

    fn estimate_duration(&self, _params: &Value) -> u64 {
        3000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_prefers_abstract() {
        let body = json!({
            "AbstractText": "Rust is a systems programming language.",
            "Answer": "",
            "RelatedTopics": [{"Text": "Cargo"}, {"Name": "group"}, {"Text": "rustc"}]
        });
        let (summary, related) = summarize(&body);
        assert!(summary.starts_with("Rust is"));
        assert_eq!(related, vec!["Cargo", "rustc"]);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...[truncated]");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
