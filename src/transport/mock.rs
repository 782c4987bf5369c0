//! Mock 传输层（用于测试与演示，无需 API）
//!
//! 每个 Agent 可预置若干 Run 脚本：每次 get_run 推进一步。
//! 与真实服务一致地执行两条约束：同一线程同时只能有一个活动 Run；工具输出必须整批提交。
//! 未预置脚本时，Run 直接完成并回显线程中最后一条用户消息。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::registry::AgentDefinition;
use crate::core::state::{
    MessageRole, Run, RunError, RunStatus, ThreadMessage, ToolCall, ToolOutput,
};
use crate::transport::{AssistantTransport, TransportError};

/// 脚本中的一步；每次 get_run 消费一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// 报告一次 Queued / InProgress
    Status(RunStatus),
    /// 进入 RequiresAction，直到整批输出提交后才继续
    RequireAction(Vec<ToolCall>),
    /// 写入 assistant 消息并完成
    Complete(Reply),
    /// 以 Failed / Cancelled / Expired 结束
    Terminal(RunStatus),
}

/// Run 完成时写入线程的 assistant 回复
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// 本 Run 提交过的全部工具输出，按提交顺序以换行拼接
    EchoToolOutputs,
    /// 线程中最后一条 user 消息
    EchoUserMessage,
}

#[derive(Debug)]
struct MockRun {
    snapshot: Run,
    steps: Vec<ScriptStep>,
    cursor: usize,
    outputs: Vec<ToolOutput>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    /// agent_id -> name
    agents: HashMap<String, String>,
    deleted_agents: Vec<String>,
    threads: HashMap<String, Vec<ThreadMessage>>,
    runs: HashMap<String, MockRun>,
    scripts: HashMap<String, VecDeque<Vec<ScriptStep>>>,
    submissions: Vec<Vec<ToolOutput>>,
    cancelled_runs: Vec<String>,
    thread_creates: usize,
    polls: usize,
    pending_poll_failures: u32,
    pending_thread_failures: u32,
    failing_creates: HashSet<String>,
    failing_deletes: HashSet<String>,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn thread_busy(&self, thread_id: &str) -> bool {
        self.runs
            .values()
            .any(|r| r.snapshot.thread_id == thread_id && !r.snapshot.status.is_terminal())
    }

    fn push_message(&mut self, thread_id: &str, role: MessageRole, content: String) {
        if let Some(messages) = self.threads.get_mut(thread_id) {
            messages.push(ThreadMessage {
                role,
                content,
                created_at: chrono::Utc::now().timestamp(),
            });
        }
    }

    fn last_user_message(&self, thread_id: &str) -> String {
        self.threads
            .get(thread_id)
            .and_then(|m| m.iter().rev().find(|m| m.role == MessageRole::User))
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

/// 脚本化的内存传输层
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    latency: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用前的模拟网络延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// 为名为 agent_name 的 Agent 追加一个 Run 脚本（按 create_run 顺序消费）
    pub fn script(&self, agent_name: &str, steps: Vec<ScriptStep>) {
        self.lock()
            .scripts
            .entry(agent_name.to_string())
            .or_default()
            .push_back(steps);
    }

    /// 接下来 n 次 get_run 返回瞬时网络错误
    pub fn fail_next_polls(&self, n: u32) {
        self.lock().pending_poll_failures = n;
    }

    /// 接下来 n 次 create_thread 返回瞬时网络错误
    pub fn fail_next_thread_creates(&self, n: u32) {
        self.lock().pending_thread_failures = n;
    }

    pub fn fail_create_for(&self, agent_name: &str) {
        self.lock().failing_creates.insert(agent_name.to_string());
    }

    pub fn fail_delete_for(&self, agent_name: &str) {
        self.lock().failing_deletes.insert(agent_name.to_string());
    }

    pub fn thread_creates(&self) -> usize {
        self.lock().thread_creates
    }

    pub fn polls(&self) -> usize {
        self.lock().polls
    }

    /// 每次被接受的 submit_tool_outputs 调用
    pub fn submissions(&self) -> Vec<Vec<ToolOutput>> {
        self.lock().submissions.clone()
    }

    pub fn cancelled_runs(&self) -> Vec<String> {
        self.lock().cancelled_runs.clone()
    }

    /// 已删除 Agent 的名称
    pub fn deleted_agents(&self) -> Vec<String> {
        self.lock().deleted_agents.clone()
    }

    /// 仍存活的 Agent 名称
    pub fn live_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().agents.values().cloned().collect();
        names.sort();
        names
    }

    pub fn runs_created(&self) -> usize {
        self.lock().runs.len()
    }

    /// 线程消息，按时间正序
    pub fn messages(&self, thread_id: &str) -> Vec<ThreadMessage> {
        self.lock().threads.get(thread_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl AssistantTransport for MockTransport {
    async fn create_agent(&self, definition: &AgentDefinition) -> Result<String, TransportError> {
        self.round_trip().await;
        let mut state = self.lock();
        if state.failing_creates.contains(&definition.name) {
            return Err(TransportError::Http {
                status: 400,
                body: format!("cannot create agent {}", definition.name),
            });
        }
        let id = state.next_id("asst");
        state.agents.insert(id.clone(), definition.name.clone());
        Ok(id)
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), TransportError> {
        self.round_trip().await;
        let mut state = self.lock();
        let name = state
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(agent_id.to_string()))?;
        if state.failing_deletes.contains(&name) {
            return Err(TransportError::Http {
                status: 500,
                body: format!("cannot delete agent {name}"),
            });
        }
        state.agents.remove(agent_id);
        state.deleted_agents.push(name);
        Ok(())
    }

    async fn create_thread(&self) -> Result<String, TransportError> {
        self.round_trip().await;
        let mut state = self.lock();
        if state.pending_thread_failures > 0 {
            state.pending_thread_failures -= 1;
            return Err(TransportError::Network("simulated thread create failure".into()));
        }
        state.thread_creates += 1;
        let id = state.next_id("thread");
        state.threads.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), TransportError> {
        self.round_trip().await;
        let mut state = self.lock();
        if !state.threads.contains_key(thread_id) {
            return Err(TransportError::NotFound(thread_id.to_string()));
        }
        if state.thread_busy(thread_id) {
            return Err(TransportError::Rejected(format!(
                "thread {thread_id} has an active run"
            )));
        }
        state.push_message(thread_id, MessageRole::User, content.to_string());
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, agent_id: &str) -> Result<Run, TransportError> {
        self.round_trip().await;
        let mut state = self.lock();
        if !state.threads.contains_key(thread_id) {
            return Err(TransportError::NotFound(thread_id.to_string()));
        }
        let name = state
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(agent_id.to_string()))?;
        if state.thread_busy(thread_id) {
            return Err(TransportError::Rejected(format!(
                "thread {thread_id} already has an active run"
            )));
        }
        let steps = state
            .scripts
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| vec![ScriptStep::Complete(Reply::EchoUserMessage)]);
        let id = state.next_id("run");
        let snapshot = Run {
            id: id.clone(),
            thread_id: thread_id.to_string(),
            agent_id: agent_id.to_string(),
            status: RunStatus::Queued,
            pending: Vec::new(),
            last_error: None,
        };
        state.runs.insert(
            id,
            MockRun {
                snapshot: snapshot.clone(),
                steps,
                cursor: 0,
                outputs: Vec::new(),
            },
        );
        Ok(snapshot)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, TransportError> {
        self.round_trip().await;
        let mut state = self.lock();
        if state.pending_poll_failures > 0 {
            state.pending_poll_failures -= 1;
            return Err(TransportError::Network("simulated poll failure".into()));
        }
        state.polls += 1;

        let run = state
            .runs
            .get_mut(run_id)
            .filter(|r| r.snapshot.thread_id == thread_id)
            .ok_or_else(|| TransportError::NotFound(run_id.to_string()))?;
        let status = run.snapshot.status;
        if status.is_terminal() || status == RunStatus::RequiresAction {
            return Ok(run.snapshot.clone());
        }

        let step = run
            .steps
            .get(run.cursor)
            .cloned()
            .unwrap_or(ScriptStep::Complete(Reply::EchoUserMessage));
        run.cursor += 1;

        match step {
            ScriptStep::Status(s) => run.snapshot.status = s,
            ScriptStep::RequireAction(calls) => {
                run.snapshot.status = RunStatus::RequiresAction;
                run.snapshot.pending = calls;
            }
            ScriptStep::Terminal(s) => {
                run.snapshot.status = s;
                run.snapshot.last_error = Some(RunError {
                    code: s.as_str().to_string(),
                    message: format!("scripted {s}"),
                });
            }
            ScriptStep::Complete(reply) => {
                let text = match reply {
                    Reply::Text(text) => Some(text),
                    Reply::EchoToolOutputs => Some(
                        run.outputs
                            .iter()
                            .map(|o| o.output.as_str())
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                    Reply::EchoUserMessage => None,
                };
                run.snapshot.status = RunStatus::Completed;
                let snapshot = run.snapshot.clone();
                let text = text.unwrap_or_else(|| state.last_user_message(thread_id));
                state.push_message(thread_id, MessageRole::Assistant, text);
                return Ok(snapshot);
            }
        }
        Ok(run.snapshot.clone())
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, TransportError> {
        self.round_trip().await;
        let mut state = self.lock();
        let run = state
            .runs
            .get_mut(run_id)
            .filter(|r| r.snapshot.thread_id == thread_id)
            .ok_or_else(|| TransportError::NotFound(run_id.to_string()))?;
        if run.snapshot.status != RunStatus::RequiresAction {
            return Err(TransportError::Rejected(format!(
                "run {run_id} is not waiting for tool outputs"
            )));
        }

        let submitted: HashSet<&str> = outputs.iter().map(|o| o.tool_call_id.as_str()).collect();
        let missing: Vec<&str> = run
            .snapshot
            .pending
            .iter()
            .map(|c| c.id.as_str())
            .filter(|id| !submitted.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(TransportError::Rejected(format!(
                "missing tool outputs for: {}",
                missing.join(", ")
            )));
        }
        let expected: HashSet<&str> = run.snapshot.pending.iter().map(|c| c.id.as_str()).collect();
        if let Some(extra) = outputs.iter().find(|o| !expected.contains(o.tool_call_id.as_str())) {
            return Err(TransportError::Rejected(format!(
                "unknown tool call id: {}",
                extra.tool_call_id
            )));
        }

        run.outputs.extend(outputs.iter().cloned());
        run.snapshot.pending.clear();
        run.snapshot.status = RunStatus::InProgress;
        let snapshot = run.snapshot.clone();
        state.submissions.push(outputs.to_vec());
        Ok(snapshot)
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), TransportError> {
        self.round_trip().await;
        let mut state = self.lock();
        let run = state
            .runs
            .get_mut(run_id)
            .filter(|r| r.snapshot.thread_id == thread_id)
            .ok_or_else(|| TransportError::NotFound(run_id.to_string()))?;
        if !run.snapshot.status.is_terminal() {
            run.snapshot.status = RunStatus::Cancelled;
            run.snapshot.pending.clear();
        }
        state.cancelled_runs.push(run_id.to_string());
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, TransportError> {
        self.round_trip().await;
        let state = self.lock();
        let messages = state
            .threads
            .get(thread_id)
            .ok_or_else(|| TransportError::NotFound(thread_id.to_string()))?;
        Ok(messages.iter().rev().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn setup(transport: &MockTransport, name: &str) -> (String, String) {
        let agent = transport
            .create_agent(&AgentDefinition::new(name, "test agent"))
            .await
            .unwrap();
        let thread = transport.create_thread().await.unwrap();
        (agent, thread)
    }

    #[tokio::test]
    async fn test_partial_batch_is_rejected() {
        let transport = MockTransport::new();
        transport.script(
            "worker",
            vec![
                ScriptStep::RequireAction(vec![
                    ToolCall::new("call_1", "generate_image", json!({"prompt": "a cat"})),
                    ToolCall::new("call_2", "analyze_image", json!({"image_url": "https://x/cat.png"})),
                ]),
                ScriptStep::Complete(Reply::EchoToolOutputs),
            ],
        );
        let (agent, thread) = setup(&transport, "worker").await;
        transport.post_message(&thread, "go").await.unwrap();
        let run = transport.create_run(&thread, &agent).await.unwrap();

        let polled = transport.get_run(&thread, &run.id).await.unwrap();
        assert_eq!(polled.status, RunStatus::RequiresAction);

        let partial = transport
            .submit_tool_outputs(&thread, &run.id, &[ToolOutput::new("call_1", "url")])
            .await;
        assert!(matches!(partial, Err(TransportError::Rejected(ref m)) if m.contains("call_2")));

        // 未提交完整批次前不会完成
        let still = transport.get_run(&thread, &run.id).await.unwrap();
        assert_eq!(still.status, RunStatus::RequiresAction);
        assert!(transport.submissions().is_empty());

        transport
            .submit_tool_outputs(
                &thread,
                &run.id,
                &[ToolOutput::new("call_1", "url"), ToolOutput::new("call_2", "nice")],
            )
            .await
            .unwrap();
        let done = transport.get_run(&thread, &run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        let latest = transport.list_messages(&thread).await.unwrap();
        assert_eq!(latest[0].content, "url\nnice");
    }

    #[tokio::test]
    async fn test_one_active_run_per_thread() {
        let transport = MockTransport::new();
        transport.script("worker", vec![ScriptStep::Status(RunStatus::InProgress)]);
        let (agent, thread) = setup(&transport, "worker").await;
        transport.post_message(&thread, "first").await.unwrap();
        transport.create_run(&thread, &agent).await.unwrap();

        let second = transport.create_run(&thread, &agent).await;
        assert!(matches!(second, Err(TransportError::Rejected(_))));
        let message = transport.post_message(&thread, "second").await;
        assert!(matches!(message, Err(TransportError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_default_script_echoes_user_message() {
        let transport = MockTransport::new();
        let (agent, thread) = setup(&transport, "worker").await;
        transport.post_message(&thread, "hello").await.unwrap();
        let run = transport.create_run(&thread, &agent).await.unwrap();

        let done = transport.get_run(&thread, &run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        let messages = transport.list_messages(&thread).await.unwrap();
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(messages[0].content, "hello");
    }

    #[tokio::test]
    async fn test_cancel_marks_run_cancelled() {
        let transport = MockTransport::new();
        transport.script("worker", vec![ScriptStep::Status(RunStatus::InProgress); 3]);
        let (agent, thread) = setup(&transport, "worker").await;
        transport.post_message(&thread, "hi").await.unwrap();
        let run = transport.create_run(&thread, &agent).await.unwrap();

        transport.cancel_run(&thread, &run.id).await.unwrap();
        let polled = transport.get_run(&thread, &run.id).await.unwrap();
        assert_eq!(polled.status, RunStatus::Cancelled);
        assert_eq!(transport.cancelled_runs(), vec![run.id]);
    }
}
