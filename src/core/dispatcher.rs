//! Run 分派：驱动一轮对话
//!
//! 发消息 -> 创建 Run -> 轮询；RequiresAction 时把整批工具调用交给 ToolRouter 并发执行后一次性提交，
//! Completed 时取线程中最新的 assistant 消息。轮询等待与取消信号 select，超过 max_wait 本地超时。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::registry::RegisteredAgent;
use crate::core::state::{CallStack, MessageRole, Run, RunStatus};
use crate::core::threads::ThreadHandle;
use crate::core::OrchestratorError;
use crate::tools::{PeerDispatch, ToolContext, ToolRouter};
use crate::transport::{retry_idempotent, AssistantTransport, RetryConfig, TransportError};

/// 轮询节奏与上限
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub poll_interval: Duration,
    /// 单轮总等待上限
    pub max_wait: Duration,
    /// get_run / list_messages 的重试预算
    pub retry: RetryConfig,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_wait: Duration::from_secs(300),
            retry: RetryConfig::default(),
        }
    }
}

/// 一轮对话的调用上下文
#[derive(Clone)]
pub struct RunContext {
    /// 已包含本轮执行的 Agent
    pub call_stack: CallStack,
    pub cancel: CancellationToken,
    pub peers: Option<Arc<dyn PeerDispatch>>,
}

impl RunContext {
    pub fn new(call_stack: CallStack, cancel: CancellationToken) -> Self {
        Self {
            call_stack,
            cancel,
            peers: None,
        }
    }

    pub fn with_peers(mut self, peers: Arc<dyn PeerDispatch>) -> Self {
        self.peers = Some(peers);
        self
    }
}

pub struct RunDispatcher {
    transport: Arc<dyn AssistantTransport>,
    router: ToolRouter,
    settings: RunSettings,
}

impl RunDispatcher {
    pub fn new(transport: Arc<dyn AssistantTransport>, router: ToolRouter, settings: RunSettings) -> Self {
        Self {
            transport,
            router,
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn router(&self) -> &ToolRouter {
        &self.router
    }

    /// 在 thread 上让 agent 处理 message，返回最终文本
    ///
    /// max_wait 覆盖整轮：收尾上一轮遗留的 Run、轮询与工具批次共用同一个截止时间。
    pub async fn run(
        &self,
        thread: &ThreadHandle,
        agent: &RegisteredAgent,
        message: &str,
        ctx: &RunContext,
    ) -> Result<String, OrchestratorError> {
        let agent_id = agent.remote_id().ok_or_else(|| {
            OrchestratorError::Configuration(format!("agent '{}' has no remote id", agent.name()))
        })?;

        // 同一线程上的轮次串行
        let mut turn = tokio::select! {
            guard = thread.begin_turn() => guard,
            _ = ctx.cancel.cancelled() => return Err(OrchestratorError::Cancelled),
        };
        if ctx.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let deadline = Instant::now() + self.settings.max_wait;

        if let Some(stale) = (*turn).clone() {
            self.settle(thread.id(), &stale, ctx, deadline).await?;
            *turn = None;
        }

        self.transport.post_message(thread.id(), message).await?;
        let run = self.transport.create_run(thread.id(), agent_id).await?;
        // 直到观察到终态前都记为未结束；本 future 被丢弃时也会留给下一轮
        *turn = Some(run.id.clone());
        tracing::info!(
            agent = %agent.name(),
            thread = %thread.id(),
            run = %run.id,
            chain = %ctx.call_stack,
            "run started"
        );

        let result = self.poll_to_completion(thread, agent, &run, ctx, deadline).await;
        match &result {
            Ok(_) => tracing::info!(agent = %agent.name(), run = %run.id, "run completed"),
            Err(e) => tracing::warn!(agent = %agent.name(), run = %run.id, error = %e, "run did not complete"),
        }
        if matches!(result, Ok(_) | Err(OrchestratorError::RunTerminal { .. })) {
            *turn = None;
        }
        result
    }

    async fn poll_to_completion(
        &self,
        thread: &ThreadHandle,
        agent: &RegisteredAgent,
        run: &Run,
        ctx: &RunContext,
        deadline: Instant,
    ) -> Result<String, OrchestratorError> {
        let transport: &dyn AssistantTransport = self.transport.as_ref();
        let thread_id = thread.id();
        let run_id = run.id.as_str();
        let mut last_status = run.status;

        loop {
            self.wait_for_poll(deadline, ctx, thread_id, run_id).await?;

            let polled = retry_idempotent(&self.settings.retry, "get_run", move || {
                transport.get_run(thread_id, run_id)
            })
            .await?;
            if polled.status != last_status {
                tracing::debug!(run = %run_id, from = %last_status, to = %polled.status, "run status changed");
                last_status = polled.status;
            }

            match polled.status {
                RunStatus::Queued | RunStatus::InProgress => continue,
                RunStatus::RequiresAction => {
                    let calls = polled.pending_tool_calls();
                    if calls.is_empty() {
                        tracing::warn!(run = %run_id, "requires_action without tool calls");
                        continue;
                    }
                    let tool_ctx = ToolContext {
                        agent: agent.name().to_string(),
                        call_stack: ctx.call_stack.clone(),
                        cancel: ctx.cancel.clone(),
                        peers: ctx.peers.clone(),
                        deadline: Some(deadline),
                    };
                    // 先让嵌套 Run 自行观察取消并通知远端
                    let outputs = tokio::select! {
                        biased;
                        outputs = self.router.execute_batch(&agent.definition, calls, &tool_ctx) => outputs,
                        _ = ctx.cancel.cancelled() => return Err(self.abandon(thread_id, run_id).await),
                        _ = tokio::time::sleep_until(deadline) => {
                            return Err(OrchestratorError::Timeout(self.settings.max_wait));
                        }
                    };
                    if Instant::now() >= deadline {
                        return Err(OrchestratorError::Timeout(self.settings.max_wait));
                    }
                    tracing::debug!(run = %run_id, outputs = outputs.len(), "submitting tool outputs");
                    transport.submit_tool_outputs(thread_id, run_id, &outputs).await?;
                }
                RunStatus::Completed => return self.latest_reply(thread_id).await,
                status @ (RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired) => {
                    return Err(OrchestratorError::RunTerminal {
                        status,
                        message: polled.last_error.map(|e| e.message),
                    });
                }
            }
        }
    }

    /// 等一个轮询间隔（不超过截止时间）；到期返回 Timeout，取消时通知远端后返回 Cancelled
    async fn wait_for_poll(
        &self,
        deadline: Instant,
        ctx: &RunContext,
        thread_id: &str,
        run_id: &str,
    ) -> Result<(), OrchestratorError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(OrchestratorError::Timeout(self.settings.max_wait));
        }
        let wait = self.settings.poll_interval.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = ctx.cancel.cancelled() => Err(self.abandon(thread_id, run_id).await),
        }
    }

    /// 上一轮放弃观察的 Run：仍在活动则尽力取消，并等它进入终态后才允许新消息
    async fn settle(
        &self,
        thread_id: &str,
        run_id: &str,
        ctx: &RunContext,
        deadline: Instant,
    ) -> Result<(), OrchestratorError> {
        let transport: &dyn AssistantTransport = self.transport.as_ref();
        let mut cancel_sent = false;
        loop {
            let polled = retry_idempotent(&self.settings.retry, "get_run", move || {
                transport.get_run(thread_id, run_id)
            })
            .await;
            match polled {
                Ok(run) if run.status.is_terminal() => {
                    tracing::debug!(run = %run_id, status = %run.status, "previous run settled");
                    return Ok(());
                }
                Ok(_) => {}
                Err(TransportError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e.into()),
            }

            if !cancel_sent {
                cancel_sent = true;
                tracing::info!(thread = %thread_id, run = %run_id, "cancelling run left by an abandoned turn");
                if let Err(e) = transport.cancel_run(thread_id, run_id).await {
                    tracing::warn!(run = %run_id, error = %e, "remote cancel failed");
                }
                continue;
            }
            self.wait_for_poll(deadline, ctx, thread_id, run_id).await?;
        }
    }

    /// 线程中最新的 assistant 消息文本
    async fn latest_reply(&self, thread_id: &str) -> Result<String, OrchestratorError> {
        let transport: &dyn AssistantTransport = self.transport.as_ref();
        let messages = retry_idempotent(&self.settings.retry, "list_messages", move || {
            transport.list_messages(thread_id)
        })
        .await?;
        messages
            .into_iter()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content)
            .ok_or_else(|| {
                TransportError::Decode(format!("completed run left no assistant message in {thread_id}")).into()
            })
    }

    /// 取消：尽力通知远端后返回 Cancelled
    async fn abandon(&self, thread_id: &str, run_id: &str) -> OrchestratorError {
        if let Err(e) = self.transport.cancel_run(thread_id, run_id).await {
            tracing::warn!(run = %run_id, error = %e, "remote cancel failed");
        } else {
            tracing::info!(run = %run_id, "run cancelled");
        }
        OrchestratorError::Cancelled
    }
}
