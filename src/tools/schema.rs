//! 工具参数 Schema
//!
//! ToolParameter 既用于执行前校验 / 补全参数，也用于向工具选择器描述工具；
//! 选择器期望的输出格式由 schemars 生成 JSON Schema，拼入 prompt 以减少格式错误。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::ToolError;

/// 参数的基本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// 单个参数声明
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
            default: None,
            allowed: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }
}

/// 提供给工具选择器的工具描述
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

/// 校验参数并补全默认值；params 为 null 时按空对象处理
pub fn validate_params(parameters: &[ToolParameter], params: &Value) -> Result<Value, ToolError> {
    let mut map = match params {
        Value::Null => Map::new(),
        Value::Object(m) => m.clone(),
        other => {
            return Err(ToolError::InvalidParams(format!(
                "expected an object, got {other}"
            )))
        }
    };

    for param in parameters {
        match map.get(&param.name) {
            Some(Value::Null) | None => {
                if let Some(default) = &param.default {
                    map.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(ToolError::InvalidParams(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
            }
            Some(value) => {
                if !param.param_type.matches(value) {
                    return Err(ToolError::InvalidParams(format!(
                        "parameter '{}' should be {:?}, got {value}",
                        param.name, param.param_type
                    )));
                }
                if let Some(allowed) = &param.allowed {
                    if !allowed.contains(value) {
                        return Err(ToolError::InvalidParams(format!(
                            "parameter '{}' must be one of {}",
                            param.name,
                            Value::Array(allowed.clone())
                        )));
                    }
                }
            }
        }
    }

    Ok(Value::Object(map))
}

/// 工具选择器的回复格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolSelectionFormat {
    /// 选中的工具 id；没有合适的工具时为 null
    pub tool: Option<String>,
    /// 工具参数，键为参数名
    pub params: Map<String, Value>,
}

/// 返回工具选择回复的 JSON Schema 字符串，可拼入 prompt
pub fn tool_selection_schema_json() -> String {
    let schema = schema_for!(ToolSelectionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
