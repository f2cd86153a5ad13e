//! 工具选择：为单个步骤挑选工具并给出参数
//!
//! 返回 Ok(None) 表示没有合适的工具，规划器会改用模型直接完成该步骤。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::intent::extract_json;
use crate::llm::{LlmClient, LlmError, Message};
use crate::tools::{tool_selection_schema_json, ToolDescriptor};

/// 选中的工具及参数
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSelection {
    pub tool_id: String,
    pub params: Value,
}

impl ToolSelection {
    pub fn new(tool_id: impl Into<String>, params: Value) -> Self {
        Self {
            tool_id: tool_id.into(),
            params,
        }
    }
}

#[async_trait]
pub trait ToolSelector: Send + Sync {
    async fn select(
        &self,
        description: &str,
        tools: &[ToolDescriptor],
    ) -> Result<Option<ToolSelection>, LlmError>;
}

#[derive(Deserialize)]
struct SelectionReply {
    tool: Option<String>,
    #[serde(default)]
    params: Option<Map<String, Value>>,
}

/// 解析 `{"tool": id | null, "params": {...}}`
pub(crate) fn parse_selection(output: &str) -> Result<Option<ToolSelection>, LlmError> {
    let json = extract_json(output)
        .ok_or_else(|| LlmError::Parse(format!("no JSON object in: {output}")))?;
    let reply: SelectionReply =
        serde_json::from_str(json).map_err(|e| LlmError::Parse(format!("{e}: {json}")))?;

    Ok(reply
        .tool
        .filter(|id| !id.trim().is_empty())
        .map(|id| ToolSelection::new(id, Value::Object(reply.params.unwrap_or_default()))))
}

/// 由语言模型根据工具目录做选择
pub struct LlmToolSelector {
    llm: Arc<dyn LlmClient>,
}

impl LlmToolSelector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn system_prompt(tools: &[ToolDescriptor]) -> String {
        let catalog = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".into());
        format!(
            "You choose which tool should perform a single step of a user's request.\n\
             Available tools:\n{catalog}\n\n\
             Reply with one JSON object matching this schema and nothing else:\n{}\n\
             Use \"tool\": null when no tool fits; the step will then be answered directly.",
            tool_selection_schema_json()
        )
    }
}

#[async_trait]
impl ToolSelector for LlmToolSelector {
    async fn select(
        &self,
        description: &str,
        tools: &[ToolDescriptor],
    ) -> Result<Option<ToolSelection>, LlmError> {
        if tools.is_empty() {
            return Ok(None);
        }
        let output = self
            .llm
            .complete(&[
                Message::system(Self::system_prompt(tools)),
                Message::user(description),
            ])
            .await?;
        parse_selection(&output)
    }
}

/// 关键词规则选择器，离线模式使用；只返回目录中存在的工具
#[derive(Debug, Default)]
pub struct KeywordToolSelector;

const NOT_A_ROOM: &[&str] = &[
    "the", "a", "all", "on", "off", "turn", "switch", "my", "dim", "toggle", "lights", "light",
    "and", "to", "set",
];

fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '%')
                .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// 在原文中不区分大小写地查找 needle，返回原文中的字节区间（始终落在字符边界上）
fn find_ignore_case(text: &str, needle: &str) -> Option<(usize, usize)> {
    text.char_indices().find_map(|(start, _)| {
        let mut rest = text[start..].chars();
        let mut end = start;
        for n in needle.chars() {
            let c = rest.next()?;
            if !c.to_lowercase().eq(n.to_lowercase()) {
                return None;
            }
            end += c.len_utf8();
        }
        Some((start, end))
    })
}

impl KeywordToolSelector {
    fn light_params(lower: &str) -> Value {
        let words = words(lower);
        let light_at = words
            .iter()
            .position(|w| w.starts_with("light") || w.starts_with("lamp"));

        // "kitchen light" / "living room lights"
        let mut room = light_at.and_then(|i| {
            let prev = words.get(i.checked_sub(1)?)?;
            if NOT_A_ROOM.contains(&prev.as_str()) {
                return None;
            }
            if prev == "room" {
                let before = words.get(i.checked_sub(2)?)?;
                return Some(format!("{before} room"));
            }
            Some(prev.clone())
        });

        // "lights in the bedroom"
        if room.is_none() {
            if let Some(i) = words.iter().position(|w| w == "in") {
                let mut j = i + 1;
                if words.get(j).map(String::as_str) == Some("the") {
                    j += 1;
                }
                room = words.get(j).map(|w| match words.get(j + 1) {
                    Some(next) if next == "room" => format!("{w} room"),
                    _ => w.clone(),
                });
            }
        }

        let action = if words.iter().any(|w| w == "off") {
            "off"
        } else if words.iter().any(|w| w == "toggle") {
            "toggle"
        } else {
            "on"
        };

        let mut params = json!({
            "room": room.unwrap_or_else(|| "living room".into()),
            "action": action,
        });
        if let Some(b) = words
            .iter()
            .find_map(|w| w.strip_suffix('%')?.parse::<f64>().ok())
        {
            params["brightness"] = json!(b.clamp(0.0, 100.0));
        }
        params
    }

    /// "10 minutes" / "1 hour and 30 seconds" -> 秒数；溢出时视为没有时长
    fn duration_seconds(lower: &str) -> Option<u64> {
        let words = words(lower);
        let mut total: u64 = 0;
        let mut found = false;
        for pair in words.windows(2) {
            let Ok(n) = pair[0].parse::<u64>() else {
                continue;
            };
            let unit = pair[1].as_str();
            let factor = if unit.starts_with("sec") || unit == "s" {
                1
            } else if unit.starts_with("min") {
                60
            } else if unit.starts_with("hour") || unit.starts_with("hr") {
                3600
            } else {
                continue;
            };
            total = total.checked_add(n.checked_mul(factor)?)?;
            found = true;
        }
        found.then_some(total)
    }

    fn search_query(description: &str) -> String {
        let trimmed = description.trim();
        for prefix in ["search the web for ", "search for ", "search ", "look up "] {
            if let Some((0, end)) = find_ignore_case(trimmed, prefix) {
                return trimmed[end..].trim().to_string();
            }
        }
        trimmed.to_string()
    }

    fn memory_content(description: &str) -> String {
        let trimmed = description.trim();
        for prefix in ["remember that ", "remember ", "note that ", "记住"] {
            if let Some((_, end)) = find_ignore_case(trimmed, prefix) {
                let content = trimmed[end..].trim();
                if !content.is_empty() {
                    return content.to_string();
                }
            }
        }
        trimmed.to_string()
    }

    fn classify(description: &str) -> Option<ToolSelection> {
        let lower = description.to_lowercase();

        if contains_any(&lower, &["recall", "do you remember", "what did i", "remind me what"]) {
            return Some(ToolSelection::new(
                "recall_memory",
                json!({ "query": description.trim() }),
            ));
        }
        if contains_any(&lower, &["remember", "note that", "记住"]) {
            return Some(ToolSelection::new(
                "store_memory",
                json!({ "content": Self::memory_content(description) }),
            ));
        }
        if contains_any(&lower, &["light", "lamp", "灯"]) {
            return Some(ToolSelection::new("control_light", Self::light_params(&lower)));
        }
        if contains_any(&lower, &["timer", "countdown"]) {
            let seconds = Self::duration_seconds(&lower)?;
            return Some(ToolSelection::new("set_timer", json!({ "seconds": seconds })));
        }
        if contains_any(&lower, &["search", "look up", "who is", "what is"]) {
            return Some(ToolSelection::new(
                "web_search",
                json!({ "query": Self::search_query(description) }),
            ));
        }
        if contains_any(&lower, &["photo", "picture", "snapshot", "camera"]) {
            return Some(ToolSelection::new("capture_image", json!({})));
        }
        None
    }
}

#[async_trait]
impl ToolSelector for KeywordToolSelector {
    async fn select(
        &self,
        description: &str,
        tools: &[ToolDescriptor],
    ) -> Result<Option<ToolSelection>, LlmError> {
        Ok(Self::classify(description).filter(|s| tools.iter().any(|d| d.id == s.tool_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(ids: &[&str]) -> Vec<ToolDescriptor> {
        ids.iter()
            .map(|id| ToolDescriptor {
                id: id.to_string(),
                name: id.to_string(),
                description: String::new(),
                parameters: vec![],
            })
            .collect()
    }

    #[tokio::test]
    async fn test_keyword_light() {
        let tools = catalog(&["control_light"]);
        let sel = KeywordToolSelector
            .select("Turn on the kitchen light", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.tool_id, "control_light");
        assert_eq!(sel.params, json!({"room": "kitchen", "action": "on"}));

        let sel = KeywordToolSelector
            .select("dim the lights in the living room to 30%", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.params["room"], "living room");
        assert_eq!(sel.params["brightness"], 30.0);

        let sel = KeywordToolSelector
            .select("switch off the bedroom lamp", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.params, json!({"room": "bedroom", "action": "off"}));
    }

    #[tokio::test]
    async fn test_keyword_timer_duration() {
        let tools = catalog(&["set_timer"]);
        let sel = KeywordToolSelector
            .select("set a timer for 1 hour and 30 minutes", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.params["seconds"], 5400);

        let none = KeywordToolSelector
            .select("set a timer", &tools)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_keyword_memory_order() {
        let tools = catalog(&["store_memory", "recall_memory"]);
        let sel = KeywordToolSelector
            .select("Remember that the wifi password is hunter2", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.tool_id, "store_memory");
        assert_eq!(sel.params["content"], "the wifi password is hunter2");

        let sel = KeywordToolSelector
            .select("Do you remember the wifi password?", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.tool_id, "recall_memory");
    }

    #[tokio::test]
    async fn test_keyword_only_catalog_tools() {
        let sel = KeywordToolSelector
            .select("Turn on the kitchen light", &catalog(&["web_search"]))
            .await
            .unwrap();
        assert!(sel.is_none());

        let sel = KeywordToolSelector
            .select("write a haiku about autumn", &catalog(&["control_light"]))
            .await
            .unwrap();
        assert!(sel.is_none());
    }

    #[tokio::test]
    async fn test_keyword_non_ascii_text() {
        let tools = catalog(&["store_memory", "web_search", "control_light"]);
        let sel = KeywordToolSelector
            .select("Ⱥ remember éclairs are tasty", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.tool_id, "store_memory");
        assert_eq!(sel.params["content"], "éclairs are tasty");

        let sel = KeywordToolSelector
            .select("ȺȺ NOTE THAT Straße ist gesperrt", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.params["content"], "Straße ist gesperrt");

        let sel = KeywordToolSelector
            .select("SEARCH FOR Ærøskøbing ferry times", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.tool_id, "web_search");
        assert_eq!(sel.params["query"], "Ærøskøbing ferry times");
    }

    #[tokio::test]
    async fn test_keyword_cjk_text() {
        let tools = catalog(&["store_memory", "control_light"]);
        let sel = KeywordToolSelector
            .select("记住明天下午三点开会", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.tool_id, "store_memory");
        assert_eq!(sel.params["content"], "明天下午三点开会");

        let sel = KeywordToolSelector
            .select("打开客厅的灯", &tools)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sel.tool_id, "control_light");
        assert_eq!(sel.params["action"], "on");
    }

    #[tokio::test]
    async fn test_keyword_timer_overflow_selects_nothing() {
        let tools = catalog(&["set_timer"]);
        let none = KeywordToolSelector
            .select("set a timer for 307445734561825861 hours", &tools)
            .await
            .unwrap();
        assert!(none.is_none());

        let none = KeywordToolSelector
            .select(
                &format!("set a timer for {} seconds and 1 second", u64::MAX),
                &tools,
            )
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_find_ignore_case_boundaries() {
        assert_eq!(find_ignore_case("Ⱥ remember x", "remember "), Some((3, 12)));
        assert_eq!(find_ignore_case("abc", "zz"), None);
        assert_eq!(find_ignore_case("ab", "abc"), None);
    }

    #[test]
    fn test_parse_selection() {
        let sel = parse_selection(r#"{"tool": "web_search", "params": {"query": "rust"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(sel, ToolSelection::new("web_search", json!({"query": "rust"})));

        assert_eq!(parse_selection(r#"{"tool": null, "params": {}}"#).unwrap(), None);
        assert!(parse_selection("no idea").is_err());
    }
}
