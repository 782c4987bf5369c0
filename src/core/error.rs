//! 编排层错误类型
//!
//! 工具层的失败在 ToolRouter 处被吸收为字符串输出（见 `as_tool_output`）；
//! Run 终态、超时、取消与配置错误以类型化错误向调用方传播。

use std::time::Duration;

use thiserror::Error;

use crate::core::state::RunStatus;
use crate::transport::TransportError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Run 进入 failed / cancelled / expired；不自动重试
    #[error("Run ended with status '{status}'{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    RunTerminal {
        status: RunStatus,
        message: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Agent '{0}' not found")]
    UnknownAgent(String),

    #[error("Agent/tool '{0}' not found")]
    UnknownTool(String),

    #[error("Agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("Cycle detected: '{target}' is already active in {chain}")]
    CycleDetected { target: String, chain: String },

    /// 本地轮询超过上限；远端 Run 可能仍在运行，但不再观察
    #[error("Timed out after {0:?} waiting for run")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// 转为提交给 Run 的工具输出字符串
    pub fn as_tool_output(&self) -> String {
        format!("Error: {self}")
    }

    /// 终态错误对应的 Run 状态
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            OrchestratorError::RunTerminal { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_agent_tool_output() {
        let err = OrchestratorError::UnknownAgent("unknown_agent".to_string());
        assert_eq!(err.as_tool_output(), "Error: Agent 'unknown_agent' not found");
    }

    #[test]
    fn test_unknown_tool_tool_output() {
        let err = OrchestratorError::UnknownTool("teleport".to_string());
        assert_eq!(err.as_tool_output(), "Error: Agent/tool 'teleport' not found");
    }

    #[test]
    fn test_run_terminal_display() {
        let bare = OrchestratorError::RunTerminal {
            status: RunStatus::Failed,
            message: None,
        };
        assert_eq!(bare.to_string(), "Run ended with status 'failed'");
        assert_eq!(bare.terminal_status(), Some(RunStatus::Failed));

        let detailed = OrchestratorError::RunTerminal {
            status: RunStatus::Expired,
            message: Some("rate limit".to_string()),
        };
        assert_eq!(detailed.to_string(), "Run ended with status 'expired': rate limit");
    }

    #[test]
    fn test_cycle_display_names_chain() {
        let err = OrchestratorError::CycleDetected {
            target: "a".to_string(),
            chain: "a -> b".to_string(),
        };
        assert!(err.to_string().contains("a -> b"));
    }
}
