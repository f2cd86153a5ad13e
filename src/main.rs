//! JARVIS 命令行入口
//!
//! `jarvis 打开厨房的灯` 执行一个目标；不带参数时逐行读取 stdin。
//! 事件以 JSON 行输出到 stdout，目标结束后输出最终快照；Ctrl+C 取消所有进行中的目标并退出。

use std::sync::Arc;

use anyhow::Context;
use jarvis::config::{load_config, AppConfig};
use jarvis::{observability, GoalOrchestrator, OrchestratorBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

fn spawn_event_printer(
    mut rx: broadcast::Receiver<jarvis::GoalEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn run_request(orchestrator: &Arc<GoalOrchestrator>, text: String) -> anyhow::Result<()> {
    let goal = orchestrator
        .create_goal(text)
        .await
        .context("Failed to create goal")?;
    let finished = orchestrator
        .wait_for_goal(&goal.id)
        .await
        .context("Goal disappeared before finishing")?;
    println!("{}", serde_json::to_string_pretty(&finished)?);
    Ok(())
}

async fn run_stdin(orchestrator: &Arc<GoalOrchestrator>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = run_request(orchestrator, line.to_string()).await {
            tracing::error!(error = %format!("{e:#}"), "Request failed");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("Failed to build orchestrator")?;
    let printer = spawn_event_printer(orchestrator.subscribe());

    let request: Vec<String> = std::env::args().skip(1).collect();
    let run = async {
        if request.is_empty() {
            run_stdin(&orchestrator).await
        } else {
            run_request(&orchestrator, request.join(" ")).await
        }
    };

    let result = tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            let cancelled = orchestrator.cancel_all().await;
            tracing::info!(cancelled, "Interrupted, cancelled in-flight goals");
            Ok(())
        }
    };

    // 让最后的事件有机会输出
    tokio::task::yield_now().await;
    printer.abort();
    result
}
