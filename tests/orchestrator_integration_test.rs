//! 编排器集成测试：用脚本化的分解器 / 工具选择器 / 工具驱动公开 API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jarvis::config::{AppConfig, OrchestratorConfig};
use jarvis::core::OrchestratorError;
use jarvis::intent::{LlmDecomposer, LlmFallback, TaskDecomposer, ToolSelection, ToolSelector};
use jarvis::llm::{LlmClient, LlmError, Message, MockLlmClient};
use jarvis::tools::{Tool, ToolDescriptor, ToolError, ToolRegistry};
use jarvis::workflow::{ExecutionMode, TaskContext, TaskSpec};
use jarvis::{GoalEvent, GoalOrchestrator, GoalStatus, OrchestratorBuilder, TaskStatus};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};

// ---------- 脚本化协作者 ----------

/// 固定返回给定步骤
struct ScriptedDecomposer {
    steps: Vec<TaskSpec>,
}

impl ScriptedDecomposer {
    fn linear(descriptions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            steps: descriptions.iter().map(|d| TaskSpec::new(*d)).collect(),
        })
    }

    fn steps(steps: Vec<TaskSpec>) -> Arc<Self> {
        Arc::new(Self { steps })
    }
}

#[async_trait]
impl TaskDecomposer for ScriptedDecomposer {
    async fn decompose(&self, _request: &str) -> Result<Vec<String>, LlmError> {
        Ok(self.steps.iter().map(|s| s.description.clone()).collect())
    }

    async fn decompose_steps(&self, _request: &str) -> Result<Vec<TaskSpec>, LlmError> {
        Ok(self.steps.clone())
    }
}

struct FailingDecomposer;

#[async_trait]
impl TaskDecomposer for FailingDecomposer {
    async fn decompose(&self, _request: &str) -> Result<Vec<String>, LlmError> {
        Err(LlmError::Request("planner offline".into()))
    }
}

/// "tool_id: 描述" 形式的步骤选择对应工具，其余无工具
struct PrefixSelector;

#[async_trait]
impl ToolSelector for PrefixSelector {
    async fn select(
        &self,
        description: &str,
        tools: &[ToolDescriptor],
    ) -> Result<Option<ToolSelection>, LlmError> {
        let Some((id, _)) = description.split_once(':') else {
            return Ok(None);
        };
        Ok(tools
            .iter()
            .find(|d| d.id == id.trim())
            .map(|d| ToolSelection::new(d.id.clone(), json!({}))))
    }
}

/// "boom" 开头的步骤选择失败，其余选择一个没有注册的工具
struct UnreliableSelector;

#[async_trait]
impl ToolSelector for UnreliableSelector {
    async fn select(
        &self,
        description: &str,
        _tools: &[ToolDescriptor],
    ) -> Result<Option<ToolSelection>, LlmError> {
        if description.starts_with("boom") {
            return Err(LlmError::Parse("selector returned prose".into()));
        }
        Ok(Some(ToolSelection::new("ghost", json!({}))))
    }
}

/// 固定回复的 LLM
struct CannedLlm(&'static str);

#[async_trait]
impl LlmClient for CannedLlm {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        Ok(self.0.to_string())
    }
}

fn offline_orchestrator() -> Arc<GoalOrchestrator> {
    let mut config = AppConfig::default();
    config.llm.provider = Some("mock".into());
    OrchestratorBuilder::new(config).build().unwrap()
}

// ---------- 测试工具 ----------

struct OkTool;

#[async_trait]
impl Tool for OkTool {
    fn id(&self) -> &str {
        "ok"
    }

    fn name(&self) -> &str {
        "Ok"
    }

    fn description(&self) -> &str {
        "Always succeeds"
    }

    async fn execute(&self, _params: &Value, context: &TaskContext) -> Result<Value, ToolError> {
        Ok(json!({ "previous_results": context.accumulated_data.len() }))
    }
}

/// 前 failures 次调用失败
struct FlakyTool {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Tool for FlakyTool {
    fn id(&self) -> &str {
        "flaky"
    }

    fn name(&self) -> &str {
        "Flaky"
    }

    fn description(&self) -> &str {
        "Fails a few times before succeeding"
    }

    async fn execute(&self, _params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ToolError::ExecutionFailed("connection reset".into()));
        }
        Ok(json!("recovered"))
    }
}

/// 进入执行后通知 entered，等待 release 后返回
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

struct GateTool(Arc<Gate>);

#[async_trait]
impl Tool for GateTool {
    fn id(&self) -> &str {
        "gate"
    }

    fn name(&self) -> &str {
        "Gate"
    }

    fn description(&self) -> &str {
        "Blocks until released"
    }

    async fn execute(&self, _params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        self.0.entered.notify_one();
        self.0.release.notified().await;
        Ok(json!("released"))
    }
}

/// 记录同时执行的最大数量
#[derive(Default)]
struct Probe {
    running: AtomicUsize,
    peak: AtomicUsize,
}

struct ProbeTool(Arc<Probe>);

#[async_trait]
impl Tool for ProbeTool {
    fn id(&self) -> &str {
        "probe"
    }

    fn name(&self) -> &str {
        "Probe"
    }

    fn description(&self) -> &str {
        "Sleeps and records concurrency"
    }

    async fn execute(&self, _params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        let now = self.0.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.0.running.fetch_sub(1, Ordering::SeqCst);
        Ok(json!(null))
    }

    fn estimate_duration(&self, _params: &Value) -> u64 {
        100
    }
}

/// 固定耗时的工具
struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn id(&self) -> &str {
        "slow"
    }

    fn name(&self) -> &str {
        "Slow"
    }

    fn description(&self) -> &str {
        "Takes 1.5 seconds"
    }

    async fn execute(&self, _params: &Value, _context: &TaskContext) -> Result<Value, ToolError> {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        Ok(json!("slow done"))
    }
}

// ---------- 辅助 ----------

fn registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(OkTool);
    registry.register(SlowTool);
    registry
}

fn orchestrator_with(
    registry: ToolRegistry,
    decomposer: Arc<dyn TaskDecomposer>,
    config: OrchestratorConfig,
) -> Arc<GoalOrchestrator> {
    Arc::new(GoalOrchestrator::new(
        Arc::new(registry),
        decomposer,
        Arc::new(PrefixSelector),
        Arc::new(LlmFallback::new(Arc::new(MockLlmClient))),
        config,
    ))
}

/// 收集某个目标的事件直到终态事件
async fn collect_until_terminal(
    rx: &mut broadcast::Receiver<GoalEvent>,
    goal_id: &str,
) -> Vec<GoalEvent> {
    let mut events = Vec::new();
    loop {
        match rx.recv().await {
            Ok(event) if event.goal_id() == goal_id => {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    return events;
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return events,
        }
    }
}

fn kinds(events: &[GoalEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| !matches!(e, GoalEvent::ProgressUpdate { .. }))
        .map(GoalEvent::kind)
        .collect()
}

// ---------- 场景 ----------

#[tokio::test]
async fn test_single_light_request_completes() {
    let mut config = AppConfig::default();
    config.llm.provider = Some("mock".into());
    let orch = OrchestratorBuilder::new(config).build().unwrap();
    let mut rx = orch.subscribe();

    let goal = orch.create_goal("turn on the kitchen light").await.unwrap();
    assert_eq!(goal.tasks.len(), 1);
    assert_eq!(goal.tasks[0].description, "turn on the kitchen light");
    assert_eq!(goal.tasks[0].tool_id(), Some("control_light"));

    let events = collect_until_terminal(&mut rx, &goal.id).await;
    assert_eq!(
        kinds(&events),
        vec!["goal_created", "task_started", "task_completed", "goal_completed"]
    );

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.tasks[0].status, TaskStatus::Completed);
    assert_eq!(done.tasks[0].result.as_ref().unwrap()["state"]["on"], true);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_backoff() {
    let registry = registry();
    registry.register(FlakyTool {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let orch = orchestrator_with(
        registry,
        ScriptedDecomposer::linear(&["ok: fetch", "flaky: sync", "ok: report"]),
        OrchestratorConfig::default(),
    );
    let mut rx = orch.subscribe();

    let goal = orch.create_goal("sync everything").await.unwrap();
    let events = collect_until_terminal(&mut rx, &goal.id).await;

    let delays: Vec<(u32, u64)> = events
        .iter()
        .filter_map(|e| match e {
            GoalEvent::TaskRetrying {
                task_id,
                attempt,
                delay_ms,
                ..
            } if task_id.ends_with("_task_1") => Some((*attempt, *delay_ms)),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![(1, 2000), (2, 4000)]);

    assert!(events.iter().any(|e| matches!(
        e,
        GoalEvent::TaskCompleted { task_id, .. } if task_id.ends_with("_task_1")
    )));
    assert!(matches!(events.last(), Some(GoalEvent::GoalCompleted { .. })));

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);
    assert_eq!(done.tasks[1].retry_count, 2);
    assert!(done.tasks.iter().all(|t| t.status == TaskStatus::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_fails_goal() {
    let registry = registry();
    registry.register(FlakyTool {
        failures: usize::MAX,
        calls: AtomicUsize::new(0),
    });
    let orch = orchestrator_with(
        registry,
        ScriptedDecomposer::linear(&["flaky: always broken"]),
        OrchestratorConfig::default(),
    );
    let mut rx = orch.subscribe();

    let goal = orch.create_goal("do the broken thing").await.unwrap();
    let events = collect_until_terminal(&mut rx, &goal.id).await;

    let started = events
        .iter()
        .filter(|e| matches!(e, GoalEvent::TaskStarted { .. }))
        .count();
    assert_eq!(started, 3);
    assert!(events.iter().any(|e| matches!(
        e,
        GoalEvent::TaskFailed { attempts: 3, .. }
    )));
    assert!(matches!(
        events.last(),
        Some(GoalEvent::GoalFailed {
            failed_tasks: Some(1),
            error: None,
            ..
        })
    ));

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Failed);
    assert_eq!(done.tasks[0].status, TaskStatus::Failed);
    assert_eq!(done.tasks[0].retry_count, done.tasks[0].max_retries);
}

#[tokio::test]
async fn test_cancel_while_task_running() {
    let gate = Arc::new(Gate::default());
    let registry = registry();
    registry.register(GateTool(Arc::clone(&gate)));
    let orch = orchestrator_with(
        registry,
        ScriptedDecomposer::linear(&["ok: first", "gate: second", "ok: third"]),
        OrchestratorConfig::default(),
    );
    let mut rx = orch.subscribe();

    let goal = orch.create_goal("three steps").await.unwrap();
    gate.entered.notified().await;

    let running = orch.get_goal(&goal.id).await.unwrap();
    assert_eq!(running.tasks[1].status, TaskStatus::Executing);
    assert_eq!(running.tasks[2].status, TaskStatus::Pending);

    assert!(orch.cancel_goal(&goal.id).await);
    let cancelled = orch.get_goal(&goal.id).await.unwrap();
    assert_eq!(cancelled.status, GoalStatus::Cancelled);
    assert_eq!(cancelled.tasks[2].status, TaskStatus::Cancelled);

    // 第二次取消无副作用
    assert!(orch.cancel_goal(&goal.id).await);

    gate.release.notify_one();
    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Cancelled);
    assert_eq!(done.tasks[0].status, TaskStatus::Completed);
    assert_eq!(done.tasks[1].status, TaskStatus::Cancelled);
    assert!(done.tasks[1].result.is_none());
    assert_eq!(done.tasks[2].status, TaskStatus::Cancelled);

    let events = collect_until_terminal(&mut rx, &goal.id).await;
    assert!(matches!(events.last(), Some(GoalEvent::GoalCancelled { .. })));
    let mut after = Vec::new();
    while let Ok(event) = rx.try_recv() {
        after.push(event);
    }
    assert!(after.iter().all(|e| !e.is_terminal()));
    assert!(orch.get_active_goals().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic() {
    let config = OrchestratorConfig {
        progress_interval_ms: 500,
        ..OrchestratorConfig::default()
    };
    let orch = orchestrator_with(
        registry(),
        ScriptedDecomposer::linear(&["slow: a", "slow: b", "slow: c", "slow: d"]),
        config,
    );
    let mut rx = orch.subscribe();

    let goal = orch.create_goal("four slow steps").await.unwrap();
    let events = collect_until_terminal(&mut rx, &goal.id).await;

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            GoalEvent::ProgressUpdate { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| *p <= 100));

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.progress, 100);
}

#[tokio::test]
async fn test_dependencies_complete_before_dependents_start() {
    let orch = orchestrator_with(
        registry(),
        ScriptedDecomposer::steps(vec![
            TaskSpec::new("ok: root").with_dependencies(vec![]),
            TaskSpec::new("ok: left").with_dependencies(vec![0]),
            TaskSpec::new("ok: right").with_dependencies(vec![0]),
            TaskSpec::new("ok: join").with_dependencies(vec![1, 2]),
        ]),
        OrchestratorConfig::default(),
    );
    let mut rx = orch.subscribe();

    let goal = orch.create_goal("diamond").await.unwrap();
    assert_eq!(goal.parallel_groups.len(), 3);
    assert_eq!(goal.parallel_groups[1].len(), 2);

    let events = collect_until_terminal(&mut rx, &goal.id).await;
    let position = |kind: &str, suffix: &str| {
        events
            .iter()
            .position(|e| match e {
                GoalEvent::TaskStarted { task_id, .. } => kind == "start" && task_id.ends_with(suffix),
                GoalEvent::TaskCompleted { task_id, .. } => {
                    kind == "done" && task_id.ends_with(suffix)
                }
                _ => false,
            })
            .unwrap()
    };
    assert!(position("done", "_task_0") < position("start", "_task_1"));
    assert!(position("done", "_task_0") < position("start", "_task_2"));
    assert!(position("done", "_task_1") < position("start", "_task_3"));
    assert!(position("done", "_task_2") < position("start", "_task_3"));

    // 第三个任务看得到前面三个任务的结果
    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(
        done.tasks[3].result,
        Some(json!({ "previous_results": 3 }))
    );
}

#[tokio::test]
async fn test_concurrency_cap_is_enforced() {
    let probe = Arc::new(Probe::default());
    let registry = registry();
    registry.register(ProbeTool(Arc::clone(&probe)));
    let steps = (0..5)
        .map(|i| TaskSpec::new(format!("probe: {i}")).with_dependencies(vec![]))
        .collect();
    let config = OrchestratorConfig {
        max_concurrent_tasks: 2,
        ..OrchestratorConfig::default()
    };
    let orch = orchestrator_with(registry, ScriptedDecomposer::steps(steps), config);

    let goal = orch.create_goal("five at once").await.unwrap();
    assert_eq!(goal.parallel_groups.len(), 1);
    assert_eq!(goal.estimated_duration_ms, 100);

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_parallel_disabled_runs_sequentially() {
    let probe = Arc::new(Probe::default());
    let registry = registry();
    registry.register(ProbeTool(Arc::clone(&probe)));
    let steps = (0..3)
        .map(|i| TaskSpec::new(format!("probe: {i}")).with_dependencies(vec![]))
        .collect();
    let orch = orchestrator_with(
        registry,
        ScriptedDecomposer::steps(steps),
        OrchestratorConfig::default(),
    );
    orch.update_config(|c| c.enable_parallel_execution = false);

    let goal = orch.create_goal("one by one").await.unwrap();
    orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cyclic_plan_is_rejected() {
    let orch = orchestrator_with(
        registry(),
        ScriptedDecomposer::steps(vec![
            TaskSpec::new("ok: a").with_dependencies(vec![1]),
            TaskSpec::new("ok: b").with_dependencies(vec![0]),
        ]),
        OrchestratorConfig::default(),
    );
    let err = orch.create_goal("impossible").await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::UnsatisfiableDependencies { planned: 0, total: 2 }
    ));
    assert!(orch.get_all_goals().await.is_empty());
}

#[tokio::test]
async fn test_decomposition_failure_falls_back_to_single_task() {
    let orch = orchestrator_with(registry(), Arc::new(FailingDecomposer), OrchestratorConfig::default());
    let goal = orch.create_goal("ok: just do it").await.unwrap();
    assert_eq!(goal.tasks.len(), 1);
    assert_eq!(goal.tasks[0].description, "ok: just do it");
    assert_eq!(goal.tasks[0].tool_id(), Some("ok"));

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);
}

#[tokio::test]
async fn test_fallback_sees_earlier_results() {
    let orch = orchestrator_with(
        registry(),
        ScriptedDecomposer::linear(&["ok: gather", "write a summary"]),
        OrchestratorConfig::default(),
    );
    let goal = orch.create_goal("gather and summarize").await.unwrap();
    assert_eq!(goal.tasks[1].tool_id(), None);
    assert!(goal.required_tools.contains("ok"));

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    let summary = done.tasks[1].result.as_ref().unwrap().as_str().unwrap();
    assert!(summary.starts_with("Mock response: write a summary"));
    assert!(summary.contains(&format!("{}_task_0: ", goal.id)));

    let context = done.context.read().await;
    assert_eq!(context.accumulated_data.len(), 2);
}

#[tokio::test]
async fn test_goal_listing_and_retention() {
    let orch = orchestrator_with(
        registry(),
        ScriptedDecomposer::linear(&["ok: only"]),
        OrchestratorConfig::default(),
    );
    let first = orch.create_goal("first").await.unwrap();
    orch.wait_for_goal(&first.id).await.unwrap();
    let second = orch.create_goal("second").await.unwrap();
    orch.wait_for_goal(&second.id).await.unwrap();

    let all = orch.get_all_goals().await;
    assert_eq!(all.len(), 2);
    assert!(orch.get_active_goals().await.is_empty());

    // 默认 ttl 为 1 小时，刚完成的目标不会被淘汰
    assert!(orch.cleanup_goals().await.is_empty());
    assert!(orch.remove_goal(&first.id).await);
    assert_eq!(orch.get_all_goals().await.len(), 1);
}

#[tokio::test]
async fn test_selector_failures_use_fallback() {
    let orch = Arc::new(GoalOrchestrator::new(
        Arc::new(registry()),
        ScriptedDecomposer::linear(&["boom: pick a tool", "describe the weather"]),
        Arc::new(UnreliableSelector),
        Arc::new(LlmFallback::new(Arc::new(MockLlmClient))),
        OrchestratorConfig::default(),
    ));
    let goal = orch.create_goal("two steps").await.unwrap();
    assert!(goal
        .tasks
        .iter()
        .all(|t| t.execution == ExecutionMode::Fallback));
    assert!(goal.required_tools.is_empty());

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);
    let first = done.tasks[0].result.as_ref().unwrap().as_str().unwrap();
    assert!(first.starts_with("Mock response: boom: pick a tool"));
}

#[tokio::test]
async fn test_unknown_step_reference_falls_back_to_single_task() {
    let orch = Arc::new(GoalOrchestrator::new(
        Arc::new(registry()),
        Arc::new(LlmDecomposer::new(Arc::new(CannedLlm(
            r#"[{"description":"check weather","depends_on":[7]}]"#,
        )))),
        Arc::new(PrefixSelector),
        Arc::new(LlmFallback::new(Arc::new(MockLlmClient))),
        OrchestratorConfig::default(),
    ));
    let goal = orch.create_goal("what's the weather like").await.unwrap();
    assert_eq!(goal.tasks.len(), 1);
    assert_eq!(goal.tasks[0].description, "what's the weather like");

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);
}

#[tokio::test]
async fn test_offline_requests_with_non_ascii_text() {
    let orch = offline_orchestrator();

    let goal = orch.create_goal("Ⱥ remember éclairs are tasty").await.unwrap();
    assert_eq!(goal.tasks[0].tool_id(), Some("store_memory"));
    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);

    let goal = orch.create_goal("记住明天下午三点开会").await.unwrap();
    assert_eq!(goal.tasks[0].tool_id(), Some("store_memory"));
    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);
}

#[tokio::test]
async fn test_offline_timer_with_huge_duration_uses_fallback() {
    let orch = offline_orchestrator();
    let goal = orch
        .create_goal("set a timer for 307445734561825861 hours")
        .await
        .unwrap();
    assert_eq!(goal.tasks[0].execution, ExecutionMode::Fallback);

    let done = orch.wait_for_goal(&goal.id).await.unwrap();
    assert_eq!(done.status, GoalStatus::Completed);
}
