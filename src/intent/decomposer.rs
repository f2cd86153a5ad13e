//! 请求分解：把一句自然语言请求拆成按依赖顺序排列的步骤
//!
//! LlmDecomposer 要求模型输出 JSON 数组（字符串，或带 depends_on 的对象）；
//! RuleBasedDecomposer 按连接词切分，供离线模式使用。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::intent::extract_json;
use crate::llm::{LlmClient, LlmError, Message};
use crate::workflow::TaskSpec;

#[async_trait]
pub trait TaskDecomposer: Send + Sync {
    /// 返回步骤描述列表（至少一项）
    async fn decompose(&self, request: &str) -> Result<Vec<String>, LlmError>;

    /// 带依赖信息的分解；默认每一步依赖上一步
    async fn decompose_steps(&self, request: &str) -> Result<Vec<TaskSpec>, LlmError> {
        Ok(self
            .decompose(request)
            .await?
            .into_iter()
            .map(TaskSpec::new)
            .collect())
    }
}

const DECOMPOSE_PROMPT: &str = "You are the planning module of a personal assistant. \
Split the user's request into the smallest ordered list of concrete steps. \
Reply with a JSON array only. Each element is either a string, or an object \
{\"description\": string, \"depends_on\": [indices of earlier steps]} when a step \
does not simply follow the previous one. Use a single element for simple requests.";

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStep {
    Text(String),
    Detailed {
        description: String,
        #[serde(default)]
        depends_on: Option<Vec<usize>>,
    },
}

/// 解析模型输出为步骤列表；空列表视为错误
pub(crate) fn parse_steps(output: &str) -> Result<Vec<TaskSpec>, LlmError> {
    let json = extract_json(output)
        .ok_or_else(|| LlmError::Parse(format!("no JSON array in: {output}")))?;
    let raw: Vec<RawStep> =
        serde_json::from_str(json).map_err(|e| LlmError::Parse(format!("{e}: {json}")))?;

    let specs: Vec<TaskSpec> = raw
        .into_iter()
        .map(|s| match s {
            RawStep::Text(description) => TaskSpec::new(description),
            RawStep::Detailed {
                description,
                depends_on,
            } => TaskSpec {
                description,
                depends_on,
            },
        })
        .collect();

    // 丢弃空步骤后重新编号；依赖必须指向另一个保留下来的步骤
    let mut next = 0;
    let renumbered: Vec<Option<usize>> = specs
        .iter()
        .map(|s| {
            (!s.description.trim().is_empty()).then(|| {
                next += 1;
                next - 1
            })
        })
        .collect();

    let mut steps = Vec::with_capacity(next);
    for (index, spec) in specs.into_iter().enumerate() {
        let Some(own) = renumbered[index] else {
            continue;
        };
        let depends_on = match spec.depends_on {
            None => None,
            Some(deps) => Some(
                deps.into_iter()
                    .map(|dep| match renumbered.get(dep).copied().flatten() {
                        Some(target) if target != own => Ok(target),
                        _ => Err(LlmError::Parse(format!(
                            "step {index} depends on invalid step {dep}"
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        steps.push(TaskSpec {
            description: spec.description,
            depends_on,
        });
    }

    if steps.is_empty() {
        return Err(LlmError::Parse("empty step list".into()));
    }
    Ok(steps)
}

pub struct LlmDecomposer {
    llm: Arc<dyn LlmClient>,
}

impl LlmDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskDecomposer for LlmDecomposer {
    async fn decompose(&self, request: &str) -> Result<Vec<String>, LlmError> {
        Ok(self
            .decompose_steps(request)
            .await?
            .into_iter()
            .map(|s| s.description)
            .collect())
    }

    async fn decompose_steps(&self, request: &str) -> Result<Vec<TaskSpec>, LlmError> {
        let output = self
            .llm
            .complete(&[Message::system(DECOMPOSE_PROMPT), Message::user(request)])
            .await?;
        parse_steps(&output)
    }
}

/// 按 “; / then / and then / and also” 切分请求
#[derive(Debug, Default)]
pub struct RuleBasedDecomposer;

const SEPARATORS: &[&str] = &[";", ", and then ", " and then ", ", then ", " then ", " and also "];

#[async_trait]
impl TaskDecomposer for RuleBasedDecomposer {
    async fn decompose(&self, request: &str) -> Result<Vec<String>, LlmError> {
        let mut parts = vec![request.to_string()];
        for sep in SEPARATORS {
            parts = parts
                .iter()
                .flat_map(|p| p.split(sep).map(String::from).collect::<Vec<_>>())
                .collect();
        }
        let parts: Vec<String> = parts
            .into_iter()
            .map(|p| p.trim().trim_end_matches(['.', ',']).trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(parts)
    }
}
