//! 传输层抽象
//!
//! 编排核心只依赖这组以不透明 ID 为键的请求/响应操作，不依赖具体厂商的 API 形状。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::registry::AgentDefinition;
use crate::core::state::{Run, ThreadMessage, ToolOutput};

/// 远端调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    /// 远端拒绝请求（如线程上已有活动 Run、工具输出不完整）
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl TransportError {
    /// 网络错误、429 与 5xx 视为瞬时故障
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Assistants 能力提供方：创建/删除 Agent、线程、消息、Run 与工具输出提交
#[async_trait]
pub trait AssistantTransport: Send + Sync {
    /// 创建远端 Agent，返回远端 id
    async fn create_agent(&self, definition: &AgentDefinition) -> Result<String, TransportError>;

    async fn delete_agent(&self, agent_id: &str) -> Result<(), TransportError>;

    /// 创建空线程，返回线程 id
    async fn create_thread(&self) -> Result<String, TransportError>;

    /// 以 user 身份向线程追加一条消息
    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), TransportError>;

    async fn create_run(&self, thread_id: &str, agent_id: &str) -> Result<Run, TransportError>;

    /// 查询 Run 状态（幂等，可重试）
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, TransportError>;

    /// 一次性提交整批工具输出
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, TransportError>;

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), TransportError>;

    /// 线程消息，最新的在前（幂等，可重试）
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, TransportError>;
}
