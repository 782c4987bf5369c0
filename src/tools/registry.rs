//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolRouter 在调用时做声明检查、参数解析与超时。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::state::CallStack;

/// 向其他 Agent 转发消息的能力（由 Orchestrator 实现），工具通过 ToolContext 拿到
#[async_trait]
pub trait PeerDispatch: Send + Sync {
    /// 以 call_stack 末尾的 Agent 为发送方，把 message 交给 peer 并返回其回复文本；
    /// 失败时返回 "Error: ..." 文本而不是错误，调用方把它当作普通工具输出
    async fn dispatch(
        &self,
        peer: &str,
        message: &str,
        call_stack: &CallStack,
        cancel: &CancellationToken,
    ) -> String;
}

/// 工具执行上下文：谁在调用、调用链、取消信号与转发能力
#[derive(Clone)]
pub struct ToolContext {
    /// 发起工具调用的 Agent 名
    pub agent: String,
    pub call_stack: CallStack,
    pub cancel: CancellationToken,
    pub peers: Option<Arc<dyn PeerDispatch>>,
    /// 所在轮次的截止时间；工具超时不会越过它
    pub deadline: Option<Instant>,
}

impl ToolContext {
    /// 无转发能力的上下文（单 Agent 场景与测试）
    pub fn detached(agent: impl Into<String>) -> Self {
        let agent = agent.into();
        Self {
            call_stack: CallStack::root(agent.clone()),
            agent,
            cancel: CancellationToken::new(),
            peers: None,
            deadline: None,
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("agent", &self.agent)
            .field("call_stack", &self.call_stack)
            .field("has_peers", &self.peers.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// 工具 trait：名称、描述（供模型理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（与 Agent 声明的函数名一致）
    fn name(&self) -> &str;

    /// 工具描述
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 文本以 "Error" 开头时原样交回模型，否则包装为 "Error: Tool execution failed: ..."
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 注册共享实例（同一工具可被多个 Agent 声明）
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
