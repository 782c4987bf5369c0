//! 核心编排层：数据模型与错误、Agent 注册表、线程管理、Run 分派、主控编排器、会话监管与关闭

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;
pub mod threads;

pub use dispatcher::{RunContext, RunDispatcher, RunSettings};
pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, SessionHandle, TeardownReport};
pub use registry::{AgentDefinition, AgentRegistry, RegisteredAgent, ToolSchema};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason, TeardownCleanup};
pub use state::{CallStack, MessageRole, Run, RunError, RunStatus, ThreadMessage, ToolCall, ToolOutput};
pub use threads::{ThreadHandle, ThreadKey, ThreadManager, USER_PEER};
