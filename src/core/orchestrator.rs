//! 主控编排器
//!
//! 持有 Agent 注册表、线程管理器与 Run 分派器。用户消息交给主控 Agent 在主线程上处理；
//! 主控（或任一 Agent）通过 send_message_to_agent 把子任务转给其他 Agent，转发沿调用栈递归，
//! 目标已在栈上时拒绝（环检测）。每个 Orchestrator 拥有自己的上下文，同一进程可并存多个会话。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::dispatcher::{RunContext, RunDispatcher, RunSettings};
use crate::core::registry::{AgentDefinition, AgentRegistry};
use crate::core::session_supervisor::SessionSupervisor;
use crate::core::state::CallStack;
use crate::core::threads::{ThreadHandle, ThreadKey, ThreadManager};
use crate::core::OrchestratorError;
use crate::tools::{PeerDispatch, Tool, ToolRegistry, ToolRouter};
use crate::transport::AssistantTransport;

/// 用户会话：主控 Agent 与其主线程
#[derive(Debug, Clone)]
pub struct SessionHandle {
    thread: ThreadHandle,
    agent: String,
}

impl SessionHandle {
    pub fn thread_id(&self) -> &str {
        self.thread.id()
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }
}

/// teardown 结果：已删除 / 删除失败的 Agent 名
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

struct Inner {
    transport: Arc<dyn AssistantTransport>,
    agents: AgentRegistry,
    threads: ThreadManager,
    dispatcher: RunDispatcher,
    primary: String,
    supervisor: SessionSupervisor,
    torn_down: AtomicBool,
}

/// 编排器句柄；clone 共享同一会话
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(transport: Arc<dyn AssistantTransport>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(transport)
    }

    /// 按配置连接远端服务并创建默认 Agent 团队
    pub async fn from_config(config: &AppConfig) -> Result<Self, OrchestratorError> {
        crate::agents::build_default(config).await
    }

    pub fn primary(&self) -> &str {
        &self.inner.primary
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.inner.agents
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.inner.threads
    }

    pub fn settings(&self) -> &RunSettings {
        self.inner.dispatcher.settings()
    }

    /// 创建（或返回已有的）用户与主控 Agent 之间的线程
    pub async fn start_session(&self) -> Result<SessionHandle, OrchestratorError> {
        let key = ThreadKey::primary(self.primary());
        let thread = self.inner.threads.get_or_create(&key).await?;
        Ok(SessionHandle {
            thread,
            agent: self.primary().to_string(),
        })
    }

    /// 把用户消息交给主控 Agent，返回最终回复
    pub async fn send_user_message(&self, text: &str) -> Result<String, OrchestratorError> {
        let turn = self.inner.supervisor.begin_turn();
        self.run_primary(text, turn).await
    }

    /// 同 send_user_message，另外在 token 取消时取消本轮
    pub async fn send_user_message_with_cancel(
        &self,
        text: &str,
        token: CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let turn = self.inner.supervisor.begin_turn();
        let relay = {
            let turn = turn.clone();
            async move {
                token.cancelled().await;
                turn.cancel();
                std::future::pending::<std::convert::Infallible>().await
            }
        };
        tokio::select! {
            result = self.run_primary(text, turn) => result,
            never = relay => match never {},
        }
    }

    async fn run_primary(&self, text: &str, cancel: CancellationToken) -> Result<String, OrchestratorError> {
        let session = self.start_session().await?;
        let agent = self.inner.agents.lookup(self.primary())?;
        let ctx = RunContext::new(CallStack::root(self.primary()), cancel).with_peers(Arc::new(self.clone()));
        self.inner.dispatcher.run(&session.thread, &agent, text, &ctx).await
    }

    /// 以 call_stack 栈顶为发送方把消息转给 peer；失败时返回 "Error: ..." 文本
    pub async fn dispatch_to_peer(&self, peer: &str, message: &str, call_stack: &CallStack) -> String {
        let cancel = self.inner.supervisor.begin_turn();
        self.dispatch(peer, message, call_stack, &cancel).await
    }

    async fn try_dispatch_to_peer(
        &self,
        peer: &str,
        message: &str,
        call_stack: &CallStack,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let agent = self.inner.agents.lookup(peer)?;
        if call_stack.contains(peer) {
            return Err(OrchestratorError::CycleDetected {
                target: peer.to_string(),
                chain: call_stack.to_string(),
            });
        }

        let caller = call_stack.current().unwrap_or(self.primary());
        let thread = self.inner.threads.get_or_create(&ThreadKey::new(peer, caller)).await?;
        tracing::info!(from = %caller, to = %peer, thread = %thread.id(), "dispatching to peer");

        let ctx = RunContext::new(call_stack.extended(peer), cancel.clone()).with_peers(Arc::new(self.clone()));
        self.inner.dispatcher.run(&thread, &agent, message, &ctx).await
    }

    /// 取消所有进行中的轮次（含嵌套转发）；之后的新消息照常处理
    pub fn cancel(&self) {
        self.inner.supervisor.cancel();
    }

    /// 删除全部远端 Agent；单个失败只记日志，不中断。重复调用无效果。
    pub async fn teardown(&self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return report;
        }
        self.inner.supervisor.cancel();

        for agent in self.inner.agents.iter() {
            let Some(remote_id) = agent.remote_id() else {
                continue;
            };
            match self.inner.transport.delete_agent(remote_id).await {
                Ok(()) => {
                    tracing::info!(agent = %agent.name(), remote_id = %remote_id, "agent deleted");
                    report.deleted.push(agent.name().to_string());
                }
                Err(e) => {
                    tracing::warn!(agent = %agent.name(), remote_id = %remote_id, error = %e, "failed to delete agent");
                    report.failed.push(agent.name().to_string());
                }
            }
        }
        report
    }
}

#[async_trait]
impl PeerDispatch for Orchestrator {
    async fn dispatch(
        &self,
        peer: &str,
        message: &str,
        call_stack: &CallStack,
        cancel: &CancellationToken,
    ) -> String {
        match self.try_dispatch_to_peer(peer, message, call_stack, cancel).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(peer = %peer, chain = %call_stack, error = %e, "peer dispatch failed");
                e.as_tool_output()
            }
        }
    }
}

/// 构建器：注册 Agent 与工具，校验后在远端创建 Agent
pub struct OrchestratorBuilder {
    transport: Arc<dyn AssistantTransport>,
    primary: Option<AgentDefinition>,
    peers: Vec<AgentDefinition>,
    tools: ToolRegistry,
    settings: RunSettings,
    tool_timeout: Duration,
}

impl OrchestratorBuilder {
    pub fn new(transport: Arc<dyn AssistantTransport>) -> Self {
        Self {
            transport,
            primary: None,
            peers: Vec::new(),
            tools: ToolRegistry::new(),
            settings: RunSettings::default(),
            tool_timeout: Duration::from_secs(300),
        }
    }

    /// 接收用户消息的主控 Agent
    pub fn primary(mut self, definition: AgentDefinition) -> Self {
        self.primary = Some(definition);
        self
    }

    pub fn peer(mut self, definition: AgentDefinition) -> Self {
        self.peers.push(definition);
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register_arc(tool);
        self
    }

    pub fn settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub async fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let primary = self
            .primary
            .ok_or_else(|| OrchestratorError::Configuration("no primary agent configured".to_string()))?;
        let primary_name = primary.name.clone();

        let mut agents = AgentRegistry::new();
        agents.register(primary)?;
        for peer in self.peers {
            agents.register(peer)?;
        }

        let router = ToolRouter::new(self.tools, self.tool_timeout);
        router.validate(&agents)?;

        let remote_ids = create_remote_agents(self.transport.as_ref(), &agents).await?;
        for (name, remote_id) in remote_ids {
            agents.bind_remote_id(&name, remote_id)?;
        }

        tracing::info!(primary = %primary_name, agents = agents.len(), "orchestrator ready");
        Ok(Orchestrator {
            inner: Arc::new(Inner {
                threads: ThreadManager::new(self.transport.clone()),
                dispatcher: RunDispatcher::new(self.transport.clone(), router, self.settings),
                transport: self.transport,
                agents,
                primary: primary_name,
                supervisor: SessionSupervisor::new(),
                torn_down: AtomicBool::new(false),
            }),
        })
    }
}

/// 按注册顺序创建远端 Agent；中途失败时尽力删除已创建的
async fn create_remote_agents(
    transport: &dyn AssistantTransport,
    agents: &AgentRegistry,
) -> Result<Vec<(String, String)>, OrchestratorError> {
    let mut created: Vec<(String, String)> = Vec::new();
    for agent in agents.iter() {
        match transport.create_agent(&agent.definition).await {
            Ok(remote_id) => {
                tracing::info!(agent = %agent.name(), remote_id = %remote_id, "agent created");
                created.push((agent.name().to_string(), remote_id));
            }
            Err(e) => {
                tracing::error!(agent = %agent.name(), error = %e, "failed to create agent, rolling back");
                for (name, remote_id) in &created {
                    if let Err(err) = transport.delete_agent(remote_id).await {
                        tracing::warn!(agent = %name, error = %err, "rollback delete failed");
                    }
                }
                return Err(e.into());
            }
        }
    }
    Ok(created)
}
