//! 线程管理：按 (agent, peer) 惰性创建并记忆远端会话线程
//!
//! 每个 key 对应一个 `OnceCell`，并发首次访问同一 key 时只有一个调用方执行远端创建，其余等待同一结果；
//! 不同 key 之间互不阻塞（DashMap 分片，远端调用期间不持有 map 锁）。

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};

use crate::core::OrchestratorError;
use crate::transport::AssistantTransport;

/// 用户作为对端时的 peer 名
pub const USER_PEER: &str = "user";

/// 线程绑定的 (agent, peer) 对
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub agent: String,
    pub peer: String,
}

impl ThreadKey {
    pub fn new(agent: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            peer: peer.into(),
        }
    }

    /// 用户与主控 Agent 之间的线程
    pub fn primary(agent: impl Into<String>) -> Self {
        Self::new(agent, USER_PEER)
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.peer, self.agent)
    }
}

/// 轮次锁的守卫；内容为上一轮未观察到终态的 Run id，下一轮发消息前需先让它结束
pub(crate) type TurnGuard = OwnedMutexGuard<Option<String>>;

/// 已创建的线程：远端 id + 轮次锁（同一线程同时只允许一个活动 Run）
#[derive(Debug, Clone)]
pub struct ThreadHandle {
    id: String,
    key: ThreadKey,
    turn: Arc<Mutex<Option<String>>>,
}

impl ThreadHandle {
    fn new(id: String, key: ThreadKey) -> Self {
        Self {
            id,
            key,
            turn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &ThreadKey {
        &self.key
    }

    /// 等待上一轮结束并占用本线程
    pub(crate) async fn begin_turn(&self) -> TurnGuard {
        Arc::clone(&self.turn).lock_owned().await
    }

    /// 被放弃（超时、取消或被丢弃）且尚未确认结束的 Run
    pub async fn unsettled_run(&self) -> Option<String> {
        self.turn.lock().await.clone()
    }
}

/// 线程管理器：key -> 线程，创建一次、重复使用
pub struct ThreadManager {
    transport: Arc<dyn AssistantTransport>,
    threads: DashMap<ThreadKey, Arc<OnceCell<ThreadHandle>>>,
}

impl ThreadManager {
    pub fn new(transport: Arc<dyn AssistantTransport>) -> Self {
        Self {
            transport,
            threads: DashMap::new(),
        }
    }

    /// 返回已记忆的线程，否则执行一次远端创建并记忆。
    /// 创建失败不会被记忆，下次调用会重新尝试；创建本身不自动重试。
    pub async fn get_or_create(&self, key: &ThreadKey) -> Result<ThreadHandle, OrchestratorError> {
        let cell = self.threads.entry(key.clone()).or_default().value().clone();
        let handle = cell
            .get_or_try_init(|| async {
                let id = self.transport.create_thread().await?;
                tracing::info!(thread = %id, key = %key, "thread created");
                Ok::<_, OrchestratorError>(ThreadHandle::new(id, key.clone()))
            })
            .await?;
        Ok(handle.clone())
    }

    /// 仅查询，不创建
    pub fn get(&self, key: &ThreadKey) -> Option<ThreadHandle> {
        self.threads.get(key).and_then(|cell| cell.get().cloned())
    }

    /// 已创建的线程数
    pub fn len(&self) -> usize {
        self.threads.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
