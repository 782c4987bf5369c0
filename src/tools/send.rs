//! Agent 间转发工具：把消息交给另一个 Agent 并等待其回复

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolContext};

pub const SEND_MESSAGE_TOOL: &str = "send_message_to_agent";

/// send_message_to_agent：agent_name 为可选对端的枚举，回复文本原样作为工具输出
pub struct SendMessageTool {
    peers: Vec<String>,
}

impl SendMessageTool {
    pub fn new<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peers: peers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        SEND_MESSAGE_TOOL
    }

    fn description(&self) -> &str {
        "Send a message to a specific agent to request their services"
    }

    fn parameters_schema(&self) -> Value {
        let mut agent_name = json!({
            "type": "string",
            "description": "Name of the agent to send message to"
        });
        if !self.peers.is_empty() {
            agent_name["enum"] = json!(self.peers);
        }
        json!({
            "type": "object",
            "properties": {
                "agent_name": agent_name,
                "message": {
                    "type": "string",
                    "description": "Message to send to the agent"
                }
            },
            "required": ["agent_name", "message"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let agent_name = args
            .get("agent_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "agent_name is required".to_string())?;
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| "message is required".to_string())?;
        let peers = ctx
            .peers
            .as_ref()
            .ok_or_else(|| "agent messaging is not available in this context".to_string())?;

        // 未知对端、环路等由 dispatch 以 "Error: ..." 文本返回，原样交给模型
        Ok(peers
            .dispatch(agent_name, message, &ctx.call_stack, &ctx.cancel)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::CallStack;
    use crate::tools::PeerDispatch;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl PeerDispatch for Recorder {
        async fn dispatch(
            &self,
            peer: &str,
            message: &str,
            call_stack: &CallStack,
            _cancel: &CancellationToken,
        ) -> String {
            self.seen
                .lock()
                .unwrap()
                .push((peer.to_string(), message.to_string(), call_stack.to_string()));
            format!("{peer} says ok")
        }
    }

    #[test]
    fn test_schema_lists_peers() {
        let tool = SendMessageTool::new(["dalle_assistant", "vision_assistant"]);
        let schema = tool.parameters_schema();
        assert_eq!(
            schema["properties"]["agent_name"]["enum"],
            json!(["dalle_assistant", "vision_assistant"])
        );
        assert_eq!(schema["required"], json!(["agent_name", "message"]));
    }

    #[tokio::test]
    async fn test_forwards_through_context() {
        let recorder = Arc::new(Recorder::default());
        let mut ctx = ToolContext::detached("user_proxy");
        ctx.peers = Some(recorder.clone());

        let out = SendMessageTool::new(["dalle_assistant"])
            .execute(json!({"agent_name": "dalle_assistant", "message": "draw a cat"}), &ctx)
            .await;

        assert_eq!(out, Ok("dalle_assistant says ok".to_string()));
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            ("dalle_assistant".to_string(), "draw a cat".to_string(), "user_proxy".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_fields_and_detached_context() {
        let tool = SendMessageTool::new(Vec::<String>::new());
        let ctx = ToolContext::detached("user_proxy");

        assert!(tool.execute(json!({"message": "hi"}), &ctx).await.is_err());
        assert!(tool.execute(json!({"agent_name": "x", "message": " "}), &ctx).await.is_err());
        let err = tool
            .execute(json!({"agent_name": "x", "message": "hi"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.contains("not available"));
    }
}
