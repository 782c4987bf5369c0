//! 运行时数据模型：Run 状态机、工具调用批次、线程消息与调用栈
//!
//! Run 由远端服务持有，本地只保存轮询得到的快照；CallStack 随每次跨 Agent 分派向下传递，用于环检测。

use std::fmt;

use serde::{Deserialize, Serialize};

/// Run 状态（与远端 Assistants 协议一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    /// 等待本地提交整批工具输出
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RunStatus {
    /// 终态：不会再变化，本轮结束
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent 在 Run 中请求的一次工具调用；arguments 为原始 JSON 字符串
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }
}

/// 对应某个 ToolCall 的输出；同一批次必须一次性全部提交
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

impl ToolOutput {
    pub fn new(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
        }
    }
}

/// 远端报告的 Run 失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

/// 一次轮询得到的 Run 快照
#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub agent_id: String,
    pub status: RunStatus,
    /// 仅在 RequiresAction 时非空
    pub pending: Vec<ToolCall>,
    pub last_error: Option<RunError>,
}

impl Run {
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        &self.pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// 线程中的一条消息（list_messages 按时间倒序返回）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub role: MessageRole,
    pub content: String,
    /// Unix 秒
    pub created_at: i64,
}

/// 当前分派链上处于活动状态的 Agent 名称，根在前
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack(Vec<String>);

impl CallStack {
    pub fn root(agent: impl Into<String>) -> Self {
        Self(vec![agent.into()])
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.0.iter().any(|a| a == agent)
    }

    /// 栈顶：正在发起调用的 Agent
    pub fn current(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// 返回追加 agent 后的新栈，自身不变（兄弟调用各自持有独立的栈）
    pub fn extended(&self, agent: impl Into<String>) -> Self {
        let mut frames = self.0.clone();
        frames.push(agent.into());
        Self(frames)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Expired.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::InProgress.is_terminal());
        assert!(!RunStatus::RequiresAction.is_terminal());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(RunStatus::RequiresAction.to_string(), "requires_action");
        let parsed: RunStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(parsed, RunStatus::InProgress);
    }

    #[test]
    fn test_call_stack_extend_keeps_parent() {
        let root = CallStack::root("user_proxy");
        let child = root.extended("dalle_assistant");

        assert_eq!(root.depth(), 1);
        assert_eq!(child.depth(), 2);
        assert_eq!(child.current(), Some("dalle_assistant"));
        assert!(child.contains("user_proxy"));
        assert!(!root.contains("dalle_assistant"));
        assert_eq!(child.to_string(), "user_proxy -> dalle_assistant");
    }

    #[test]
    fn test_tool_call_serializes_arguments() {
        let call = ToolCall::new("call_1", "generate_image", serde_json::json!({"prompt": "a cat"}));
        let args: serde_json::Value = serde_json::from_str(&call.arguments).unwrap();
        assert_eq!(args["prompt"], "a cat");
    }
}
