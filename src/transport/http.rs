//! HTTP 传输层：OpenAI 兼容的 Assistants REST 接口
//!
//! 支持两种风格：`openai`（Bearer + `OpenAI-Beta: assistants=v2`）与 `azure`（`api-key` 头 + `api-version` 查询参数）。
//! 线上 JSON 形状只在本文件内出现，对外只暴露 `core::state` 中的类型。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::core::registry::AgentDefinition;
use crate::core::state::{
    MessageRole, Run, RunError, RunStatus, ThreadMessage, ToolCall, ToolOutput,
};
use crate::transport::{AssistantTransport, TransportError};

/// 接口风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportFlavor {
    #[default]
    OpenAi,
    Azure,
}

/// 已校验的连接参数（由 config::TransportSection::resolve 产出）
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub flavor: TransportFlavor,
    /// 不带尾部斜杠；azure 风格已包含 `/openai`
    pub base_url: String,
    pub api_key: String,
    pub api_version: String,
    /// 默认模型（或 Azure 部署名）；AgentDefinition.model 可覆盖
    pub model: String,
    pub request_timeout: Duration,
}

/// 基于 reqwest 的 Assistants 客户端
pub struct HttpTransport {
    client: reqwest::Client,
    settings: TransportSettings,
}

impl HttpTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.settings.base_url, path);
        let builder = self.client.request(method, url);
        match self.settings.flavor {
            TransportFlavor::OpenAi => builder
                .bearer_auth(&self.settings.api_key)
                .header("OpenAI-Beta", "assistants=v2"),
            TransportFlavor::Azure => builder
                .header("api-key", &self.settings.api_key)
                .query(&[("api-version", self.settings.api_version.as_str())]),
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, TransportError> {
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(TransportError::NotFound(body));
            }
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireRun {
    id: String,
    thread_id: String,
    assistant_id: String,
    status: String,
    #[serde(default)]
    required_action: Option<WireRequiredAction>,
    #[serde(default)]
    last_error: Option<WireRunError>,
}

#[derive(Debug, Deserialize)]
struct WireRequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<WireSubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct WireSubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireRunError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessageList {
    data: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    content: Vec<WireContent>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<WireText>,
}

#[derive(Debug, Deserialize)]
struct WireText {
    value: String,
}

/// 远端状态名 -> RunStatus；cancelling 仍在进行中，incomplete 视为失败
fn parse_status(raw: &str) -> Result<RunStatus, TransportError> {
    match raw {
        "queued" => Ok(RunStatus::Queued),
        "in_progress" | "cancelling" => Ok(RunStatus::InProgress),
        "requires_action" => Ok(RunStatus::RequiresAction),
        "completed" => Ok(RunStatus::Completed),
        "failed" | "incomplete" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        "expired" => Ok(RunStatus::Expired),
        other => Err(TransportError::Decode(format!("unknown run status '{other}'"))),
    }
}

impl TryFrom<WireRun> for Run {
    type Error = TransportError;

    fn try_from(wire: WireRun) -> Result<Self, Self::Error> {
        let status = parse_status(&wire.status)?;
        let pending = if status == RunStatus::RequiresAction {
            wire.required_action
                .and_then(|a| a.submit_tool_outputs)
                .map(|s| s.tool_calls)
                .unwrap_or_default()
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect()
        } else {
            Vec::new()
        };
        let last_error = wire.last_error.map(|e| RunError {
            code: e.code.unwrap_or_default(),
            message: e.message.unwrap_or_default(),
        });
        Ok(Run {
            id: wire.id,
            thread_id: wire.thread_id,
            agent_id: wire.assistant_id,
            status,
            pending,
            last_error,
        })
    }
}

impl WireMessage {
    /// 只保留文本内容；user / assistant 以外的角色丢弃
    fn into_thread_message(self) -> Option<ThreadMessage> {
        let role = match self.role.as_str() {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            _ => return None,
        };
        let content = self
            .content
            .into_iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.map(|t| t.value))
            .collect::<Vec<_>>()
            .join("\n");
        Some(ThreadMessage {
            role,
            content,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl AssistantTransport for HttpTransport {
    async fn create_agent(&self, definition: &AgentDefinition) -> Result<String, TransportError> {
        let tools: Vec<serde_json::Value> = definition
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        let body = json!({
            "name": definition.name,
            "instructions": definition.instructions,
            "model": definition.model.as_deref().unwrap_or(&self.settings.model),
            "tools": tools,
        });
        let created: IdObject = self
            .send(self.request(Method::POST, "/assistants").json(&body))
            .await?;
        Ok(created.id)
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .send(self.request(Method::DELETE, &format!("/assistants/{agent_id}")))
            .await?;
        Ok(())
    }

    async fn create_thread(&self) -> Result<String, TransportError> {
        let created: IdObject = self
            .send(self.request(Method::POST, "/threads").json(&json!({})))
            .await?;
        Ok(created.id)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), TransportError> {
        let body = json!({ "role": "user", "content": content });
        let _: IdObject = self
            .send(
                self.request(Method::POST, &format!("/threads/{thread_id}/messages"))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, agent_id: &str) -> Result<Run, TransportError> {
        let body = json!({ "assistant_id": agent_id });
        let run: WireRun = self
            .send(
                self.request(Method::POST, &format!("/threads/{thread_id}/runs"))
                    .json(&body),
            )
            .await?;
        run.try_into()
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, TransportError> {
        let run: WireRun = self
            .send(self.request(Method::GET, &format!("/threads/{thread_id}/runs/{run_id}")))
            .await?;
        run.try_into()
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, TransportError> {
        let body = json!({ "tool_outputs": outputs });
        let run: WireRun = self
            .send(
                self.request(
                    Method::POST,
                    &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
                )
                .json(&body),
            )
            .await?;
        run.try_into()
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), TransportError> {
        let _: WireRun = self
            .send(self.request(
                Method::POST,
                &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
            ))
            .await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, TransportError> {
        let list: WireMessageList = self
            .send(
                self.request(Method::GET, &format!("/threads/{thread_id}/messages"))
                    .query(&[("order", "desc"), ("limit", "20")]),
            )
            .await?;
        Ok(list
            .data
            .into_iter()
            .filter_map(WireMessage::into_thread_message)
            .collect())
    }
}
