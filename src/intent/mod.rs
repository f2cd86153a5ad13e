//! 外部协作者：把请求分解为步骤、为步骤选择工具、无工具时让模型直接完成
//!
//! 编排核心只依赖这里的三个 trait；LLM 实现用于在线运行，规则实现用于离线运行与测试。

pub mod decomposer;
pub mod fallback;
pub mod selector;

pub use decomposer::{LlmDecomposer, RuleBasedDecomposer, TaskDecomposer};
pub use fallback::{FallbackGenerator, LlmFallback};
pub use selector::{KeywordToolSelector, LlmToolSelector, ToolSelection, ToolSelector};

/// 从模型输出中提取 JSON 片段（```json 代码块，或第一个 `[` / `{` 到最后一个对应括号）
pub(crate) fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }

    let start = trimmed.find(['[', '{'])?;
    let close = if trimmed[start..].starts_with('[') { ']' } else { '}' };
    let end = trimmed.rfind(close)?;
    (end > start).then(|| &trimmed[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_json() {
        let out = "Sure:\n```json\n[\"a\", \"b\"]\n```\nDone";
        assert_eq!(extract_json(out), Some("[\"a\", \"b\"]"));
    }

    #[test]
    fn test_extract_bare_object() {
        let out = "I pick {\"tool\": \"x\", \"params\": {}} for this.";
        assert_eq!(extract_json(out), Some("{\"tool\": \"x\", \"params\": {}}"));
    }

    #[test]
    fn test_extract_none_for_plain_text() {
        assert_eq!(extract_json("just words"), None);
    }
}
