//! Agent 注册表
//!
//! 启动阶段按名注册 AgentDefinition 并绑定远端 id；之后冻结为只读，由 Orchestrator 共享，调用路径上不加锁。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::OrchestratorError;
use crate::tools::Tool;

/// Agent 声明的工具（函数）Schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema（object）
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// 从已实现的工具生成 Schema，保证声明与处理器一致
    pub fn of(tool: &dyn Tool) -> Self {
        Self::new(tool.name(), tool.description(), tool.parameters_schema())
    }
}

/// Agent 定义：名称、指令与有序的工具 Schema；注册后不可变
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub instructions: String,
    /// 覆盖传输层默认模型
    pub model: Option<String>,
    pub tools: Vec<ToolSchema>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            instructions: instructions.into(),
            model: None,
            tools: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tool(mut self, schema: ToolSchema) -> Self {
        self.tools.push(schema);
        self
    }

    pub fn declares(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool_name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// 已注册的 Agent：定义 + 远端 id（启动时创建远端 Agent 后绑定）
#[derive(Debug)]
pub struct RegisteredAgent {
    pub definition: AgentDefinition,
    remote_id: Option<String>,
}

impl RegisteredAgent {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }
}

/// 名称 -> Agent；保留注册顺序（teardown 与远端创建按此顺序）
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<RegisteredAgent>>,
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册定义；同名重复注册返回 DuplicateAgent
    pub fn register(&mut self, definition: AgentDefinition) -> Result<(), OrchestratorError> {
        if self.agents.contains_key(&definition.name) {
            return Err(OrchestratorError::DuplicateAgent(definition.name));
        }
        let name = definition.name.clone();
        self.agents.insert(
            name.clone(),
            Arc::new(RegisteredAgent {
                definition,
                remote_id: None,
            }),
        );
        self.order.push(name);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<RegisteredAgent>, OrchestratorError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownAgent(name.to_string()))
    }

    /// 仅在构建阶段调用：记录远端创建得到的 id
    pub(crate) fn bind_remote_id(&mut self, name: &str, remote_id: String) -> Result<(), OrchestratorError> {
        let slot = self
            .agents
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::UnknownAgent(name.to_string()))?;
        *slot = Arc::new(RegisteredAgent {
            definition: slot.definition.clone(),
            remote_id: Some(remote_id),
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// 按注册顺序的名称
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 按注册顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredAgent>> {
        self.order.iter().filter_map(|name| self.agents.get(name))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
