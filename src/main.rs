//! Hive - 多智能体编排演示
//!
//! 入口：初始化日志、加载配置、创建默认 Agent 团队，发送一条用户消息并打印最终回复，退出前删除远端 Agent。
//! 用法：`hive [消息]`；未给出消息时使用配置中的 app.default_query 或内置示例。

use std::sync::Arc;

use anyhow::Context;
use hive::agents::DEFAULT_QUERY;
use hive::config::load_config;
use hive::core::{Orchestrator, ShutdownCoordinator, ShutdownManager, ShutdownReason, TeardownCleanup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::var_os("HIVE_CONFIG").map(Into::into);
    let config = load_config(config_path).context("Failed to load configuration")?;

    let orchestrator = Orchestrator::from_config(&config)
        .await
        .context("Failed to create agents")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new(shutdown.clone());
    coordinator.register(TeardownCleanup::new(orchestrator.clone()));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let prompt = if args.is_empty() {
        config
            .app
            .default_query
            .clone()
            .unwrap_or_else(|| DEFAULT_QUERY.to_string())
    } else {
        args.join(" ")
    };

    let session = orchestrator.start_session().await;
    let result = match session {
        Ok(session) => {
            tracing::info!(thread = %session.thread_id(), agent = %session.agent(), "session started");
            orchestrator
                .send_user_message_with_cancel(&prompt, shutdown.token())
                .await
        }
        Err(e) => Err(e),
    };

    shutdown.shutdown(ShutdownReason::Completed);
    coordinator.run_cleanup().await;

    let reply = result.context("Conversation failed")?;
    println!("{reply}");
    Ok(())
}
