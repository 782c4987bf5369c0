//! 工具路由
//!
//! 持有 ToolRegistry 与单次调用超时。把 Run 请求的一批 ToolCall 并发分发给处理器，
//! 所有失败（未知/未声明工具、参数非法、处理器报错、超时）都转为 "Error: ..." 输出，批次总是完整。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::time::{timeout, Instant};

use crate::core::registry::{AgentDefinition, AgentRegistry};
use crate::core::state::{ToolCall, ToolOutput};
use crate::core::OrchestratorError;
use crate::tools::{Tool, ToolContext, ToolRegistry};

/// 工具路由：名称 -> 处理器，带超时与审计
#[derive(Clone)]
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolRouter {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    /// 启动时校验：每个 Agent 声明的工具都必须有处理器
    pub fn validate(&self, agents: &AgentRegistry) -> Result<(), OrchestratorError> {
        for agent in agents.iter() {
            for schema in &agent.definition.tools {
                if !self.registry.contains(&schema.name) {
                    tracing::error!(
                        agent = %agent.name(),
                        tool = %schema.name,
                        "declared tool has no handler"
                    );
                    return Err(OrchestratorError::UnknownTool(schema.name.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行单个调用；总是返回对应 tool_call_id 的输出
    pub async fn execute(&self, agent: &AgentDefinition, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let output = match self.resolve(agent, call) {
            Ok((tool, args)) => self.invoke(tool, call, args, ctx).await,
            Err(message) => {
                tracing::warn!(agent = %agent.name, tool = %call.name, error = %message, "tool call rejected");
                message
            }
        };
        ToolOutput::new(call.id.clone(), output)
    }

    /// 并发执行一整批调用，输出顺序与输入一致
    pub async fn execute_batch(
        &self,
        agent: &AgentDefinition,
        calls: &[ToolCall],
        ctx: &ToolContext,
    ) -> Vec<ToolOutput> {
        join_all(calls.iter().map(|call| self.execute(agent, call, ctx))).await
    }

    fn resolve(&self, agent: &AgentDefinition, call: &ToolCall) -> Result<(Arc<dyn Tool>, Value), String> {
        let unknown = || OrchestratorError::UnknownTool(call.name.clone()).as_tool_output();
        if !agent.declares(&call.name) {
            return Err(unknown());
        }
        let tool = self.registry.get(&call.name).ok_or_else(unknown)?;
        let args = parse_arguments(&call.arguments)
            .map_err(|e| format!("Error: invalid arguments for '{}': {e}", call.name))?;
        Ok((tool, args))
    }

    async fn invoke(&self, tool: Arc<dyn Tool>, call: &ToolCall, args: Value, ctx: &ToolContext) -> String {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        // 不越过所在轮次的截止时间
        let budget = match ctx.deadline {
            Some(deadline) => self.timeout.min(deadline.saturating_duration_since(start)),
            None => self.timeout,
        };
        let result = timeout(budget, tool.execute(args, ctx)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "agent": ctx.agent,
            "tool": call.name,
            "tool_call_id": call.id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => content,
            Ok(Err(e)) if e.starts_with("Error") => e,
            Ok(Err(e)) => OrchestratorError::ToolExecution(format!("{}: {e}", call.name)).as_tool_output(),
            Err(_) if budget < self.timeout => OrchestratorError::ToolExecution(format!(
                "{} did not finish before the run deadline",
                call.name
            ))
            .as_tool_output(),
            Err(_) => OrchestratorError::ToolExecution(format!(
                "{} timed out after {}s",
                call.name,
                self.timeout.as_secs()
            ))
            .as_tool_output(),
        }
    }
}

/// 空参数视为 `{}`
fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::ToolSchema;
    use async_trait::async_trait;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase text"
        }

        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
            args.get("text")
                .and_then(Value::as_str)
                .map(str::to_uppercase)
                .ok_or_else(|| "text is required".to_string())
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn router(timeout: Duration) -> ToolRouter {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        registry.register(Sleepy);
        ToolRouter::new(registry, timeout)
    }

    fn agent() -> AgentDefinition {
        AgentDefinition::new("worker", "test")
            .with_tool(ToolSchema::of(&Upper))
            .with_tool(ToolSchema::of(&Sleepy))
    }

    #[tokio::test]
    async fn test_execute_ok() {
        let out = router(Duration::from_secs(1))
            .execute(
                &agent(),
                &ToolCall::new("c1", "upper", json!({"text": "cat"})),
                &ToolContext::detached("worker"),
            )
            .await;
        assert_eq!(out, ToolOutput::new("c1", "CAT"));
    }

    #[tokio::test]
    async fn test_unknown_and_undeclared_tools() {
        let router = router(Duration::from_secs(1));
        let ctx = ToolContext::detached("worker");

        let unknown = router
            .execute(&agent(), &ToolCall::new("c1", "teleport", json!({})), &ctx)
            .await;
        assert_eq!(unknown.output, "Error: Agent/tool 'teleport' not found");

        // 有处理器但该 Agent 未声明
        let bare = AgentDefinition::new("bare", "no tools");
        let undeclared = router
            .execute(&bare, &ToolCall::new("c2", "upper", json!({"text": "x"})), &ctx)
            .await;
        assert_eq!(undeclared.output, "Error: Agent/tool 'upper' not found");
    }

    #[tokio::test]
    async fn test_bad_arguments_and_handler_error() {
        let router = router(Duration::from_secs(1));
        let ctx = ToolContext::detached("worker");

        let call = ToolCall {
            id: "c1".to_string(),
            name: "upper".to_string(),
            arguments: "{not json".to_string(),
        };
        let out = router.execute(&agent(), &call, &ctx).await;
        assert!(out.output.starts_with("Error: invalid arguments for 'upper'"));

        let out = router
            .execute(&agent(), &ToolCall::new("c2", "upper", json!({})), &ctx)
            .await;
        assert_eq!(out.output, "Error: Tool execution failed: upper: text is required");
    }

    #[tokio::test]
    async fn test_empty_arguments_treated_as_object() {
        assert_eq!(parse_arguments("  ").unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_output() {
        let out = router(Duration::from_millis(20))
            .execute(
                &agent(),
                &ToolCall::new("c1", "sleepy", json!({})),
                &ToolContext::detached("worker"),
            )
            .await;
        assert!(out.output.starts_with("Error:"));
        assert!(out.output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_deadline_caps_tool_timeout() {
        let mut ctx = ToolContext::detached("worker");
        ctx.deadline = Some(Instant::now() + Duration::from_millis(30));

        let start = Instant::now();
        let out = router(Duration::from_secs(10))
            .execute(&agent(), &ToolCall::new("c1", "sleepy", json!({})), &ctx)
            .await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            out.output,
            "Error: Tool execution failed: sleepy did not finish before the run deadline"
        );
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_completeness() {
        let calls = vec![
            ToolCall::new("a", "upper", json!({"text": "one"})),
            ToolCall::new("b", "missing", json!({})),
            ToolCall::new("c", "upper", json!({"text": "three"})),
        ];
        let outputs = router(Duration::from_secs(1))
            .execute_batch(&agent(), &calls, &ToolContext::detached("worker"))
            .await;

        let ids: Vec<&str> = outputs.iter().map(|o| o.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(outputs[0].output, "ONE");
        assert!(outputs[1].output.starts_with("Error:"));
        assert_eq!(outputs[2].output, "THREE");
    }

    #[test]
    fn test_validate_requires_handlers() {
        let router = router(Duration::from_secs(1));
        let mut agents = AgentRegistry::new();
        agents.register(agent()).unwrap();
        assert!(router.validate(&agents).is_ok());

        agents
            .register(
                AgentDefinition::new("painter", "draw")
                    .with_tool(ToolSchema::new("paint", "Paint", json!({"type": "object"}))),
            )
            .unwrap();
        let err = router.validate(&agents).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTool(ref n) if n == "paint"));
    }
}
