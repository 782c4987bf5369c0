//! Hive - Rust 多智能体编排引擎
//!
//! 模块划分：
//! - **agents**: 默认 Agent 团队（user_proxy / dalle_assistant / vision_assistant）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 数据模型、Agent 注册表、线程管理、Run 分派、编排器、会话监管与关闭
//! - **llm**: 图像生成与图像分析的能力实现（OpenAI 兼容 / Mock）
//! - **observability**: 日志初始化
//! - **tools**: 工具 trait、注册表、路由与内置工具
//! - **transport**: 远端 Assistants 服务接口（HTTP / Mock）与重试

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod tools;
pub mod transport;

pub use crate::core::{Orchestrator, OrchestratorError};
