//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `JARVIS__*` 覆盖（双下划线表示嵌套，如 `JARVIS__ORCHESTRATOR__MAX_RETRIES=5`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tools::DEFAULT_SEARCH_ENDPOINT;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorConfig,
    pub retention: RetentionSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 请求未指定用户时使用
    pub default_user_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "JARVIS".into(),
            default_user_id: "default".into(),
        }
    }
}

/// [llm] 段：后端选择；实际后端还取决于环境中的 API Key
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmSection {
    /// deepseek / openai / mock；为空时按 API Key 自动选择
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// [orchestrator] 段，运行时可通过 GoalOrchestrator::update_config 修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub enable_parallel_execution: bool,
    pub progress_interval_ms: u64,
    /// 软预算：超出只记 warn，不中断
    pub goal_timeout_ms: u64,
    /// 事件通道容量
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            max_retries: 3,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            enable_parallel_execution: true,
            progress_interval_ms: 2000,
            goal_timeout_ms: 300_000,
            event_buffer: 256,
        }
    }
}

/// [retention] 段：终态目标的保留策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub max_goals: usize,
    pub ttl_secs: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            max_goals: 100,
            ttl_secs: 3600,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    pub home_assistant: HomeAssistantSection,
    pub search: SearchSection,
    pub camera: CameraSection,
    /// 记忆条目上限
    pub memory_max_entries: Option<usize>,
}

/// [tools.home_assistant] 段：未配置 base_url 时使用模拟中枢
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomeAssistantSection {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HomeAssistantSection {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: 10,
        }
    }
}

/// [tools.search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SEARCH_ENDPOINT.into(),
            timeout_secs: 15,
            max_result_chars: 4000,
        }
    }
}

/// [tools.camera] 段：未配置 snapshot_url 时 capture_image 返回 Unavailable
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    pub snapshot_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            snapshot_url: None,
            timeout_secs: 10,
        }
    }
}

/// 从 config 目录加载配置，环境变量 JARVIS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 JARVIS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("JARVIS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
