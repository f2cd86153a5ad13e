//! 编排器构建器：统一的初始化逻辑
//!
//! 根据配置与环境变量选择 LLM 后端，注册默认工具，组装分解器 / 工具选择器 / 兜底生成器。
//! 没有可用 API Key 时进入离线模式：规则分解 + 关键词选工具 + Mock 兜底。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{GoalOrchestrator, OrchestratorError, RetentionPolicy};
use crate::intent::{
    FallbackGenerator, KeywordToolSelector, LlmDecomposer, LlmFallback, LlmToolSelector,
    RuleBasedDecomposer, TaskDecomposer, ToolSelector,
};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::MemoryStore;
use crate::tools::{
    CameraTool, RecallMemoryTool, SmartHomeTool, StoreMemoryTool, TimerTool, Tool, ToolRegistry,
    WebSearchTool,
};

/// 选中的 LLM 后端；offline 为 true 表示使用 Mock
pub struct LlmSelection {
    pub client: Arc<dyn LlmClient>,
    pub offline: bool,
}

/// 按 provider 配置与 API Key 选择后端：DEEPSEEK_API_KEY -> DeepSeek，OPENAI_API_KEY -> OpenAI，否则 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> LlmSelection {
    let provider = cfg
        .llm
        .provider
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    if provider == "mock" {
        tracing::info!("Provider set to mock, running offline");
        return LlmSelection {
            client: Arc::new(MockLlmClient),
            offline: true,
        };
    }

    let use_deepseek = deepseek_key && provider != "openai";
    if use_deepseek || (provider == "deepseek" && openai_key.is_some()) {
        let model = cfg.llm.model.as_deref();
        tracing::info!(model = model.unwrap_or("default"), "Using DeepSeek LLM");
        LlmSelection {
            client: Arc::new(create_deepseek_client(model)),
            offline: false,
        }
    } else if let Some(key) = openai_key {
        let model = cfg.llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".into());
        tracing::info!(model = %model, "Using OpenAI LLM");
        LlmSelection {
            client: Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                Some(&key),
            )),
            offline: false,
        }
    } else {
        tracing::warn!("No API key set, using Mock LLM with keyword tool selection");
        LlmSelection {
            client: Arc::new(MockLlmClient),
            offline: true,
        }
    }
}

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    decomposer: Option<Arc<dyn TaskDecomposer>>,
    selector: Option<Arc<dyn ToolSelector>>,
    fallback: Option<Arc<dyn FallbackGenerator>>,
    memory: Option<Arc<MemoryStore>>,
    extra_tools: Vec<Arc<dyn Tool>>,
    default_tools: bool,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            decomposer: None,
            selector: None,
            fallback: None,
            memory: None,
            extra_tools: Vec::new(),
            default_tools: true,
        }
    }

    /// 指定 LLM 客户端（不再按环境变量选择）；分解与选工具使用 LLM 实现
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn TaskDecomposer>) -> Self {
        self.decomposer = Some(decomposer);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn ToolSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackGenerator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// 共享给记忆工具的存储
    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    /// 是否注册默认工具（灯光、记忆、搜索、计时器、拍照）
    pub fn with_default_tools(mut self, enable: bool) -> Self {
        self.default_tools = enable;
        self
    }

    /// 构建默认工具注册表
    pub fn build_tool_registry(&self, memory: Arc<MemoryStore>) -> Result<ToolRegistry, OrchestratorError> {
        let tools = &self.config.tools;
        let registry = ToolRegistry::new();
        let unavailable = |e: crate::tools::ToolError| OrchestratorError::Internal(e.to_string());

        let light = match (&tools.home_assistant.base_url, &tools.home_assistant.token) {
            (Some(base), Some(token)) => {
                SmartHomeTool::home_assistant(base, token, tools.home_assistant.timeout_secs)
                    .map_err(unavailable)?
            }
            (Some(_), None) => {
                tracing::warn!("Home Assistant base_url set without token, using simulated lights");
                SmartHomeTool::simulated()
            }
            _ => SmartHomeTool::simulated(),
        };
        registry.register(light);
        registry.register(StoreMemoryTool::new(Arc::clone(&memory)));
        registry.register(RecallMemoryTool::new(memory));
        registry.register(
            WebSearchTool::new(
                &tools.search.endpoint,
                tools.search.timeout_secs,
                tools.search.max_result_chars,
            )
            .map_err(unavailable)?,
        );
        registry.register(TimerTool::new());
        registry.register(
            CameraTool::new(tools.camera.snapshot_url.clone(), tools.camera.timeout_secs)
                .map_err(unavailable)?,
        );
        Ok(registry)
    }

    pub fn build(self) -> Result<Arc<GoalOrchestrator>, OrchestratorError> {
        let memory = self.memory.clone().unwrap_or_else(|| {
            Arc::new(MemoryStore::new(
                self.config.tools.memory_max_entries.unwrap_or(1000),
            ))
        });
        let registry = if self.default_tools {
            self.build_tool_registry(memory)?
        } else {
            ToolRegistry::new()
        };
        for tool in &self.extra_tools {
            registry.register_arc(Arc::clone(tool));
        }

        let LlmSelection { client, offline } = match &self.llm {
            Some(llm) => LlmSelection {
                client: Arc::clone(llm),
                offline: false,
            },
            None => create_llm_from_config(&self.config),
        };

        let decomposer: Arc<dyn TaskDecomposer> = match self.decomposer {
            Some(decomposer) => decomposer,
            None if offline => Arc::new(RuleBasedDecomposer),
            None => Arc::new(LlmDecomposer::new(Arc::clone(&client))),
        };
        let selector: Arc<dyn ToolSelector> = match self.selector {
            Some(selector) => selector,
            None if offline => Arc::new(KeywordToolSelector),
            None => Arc::new(LlmToolSelector::new(Arc::clone(&client))),
        };
        let fallback: Arc<dyn FallbackGenerator> = match self.fallback {
            Some(fallback) => fallback,
            None => Arc::new(LlmFallback::new(Arc::clone(&client))),
        };

        tracing::info!(
            llm = client.name(),
            offline,
            tools = registry.len(),
            "Orchestrator built"
        );

        let orchestrator = GoalOrchestrator::new(
            Arc::new(registry),
            decomposer,
            selector,
            fallback,
            self.config.orchestrator.clone(),
        )
        .with_retention(RetentionPolicy::from(&self.config.retention))
        .with_default_user(self.config.app.default_user_id.clone());
        Ok(Arc::new(orchestrator))
    }
}
