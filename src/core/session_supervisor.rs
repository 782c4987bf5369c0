//! 会话监管：取消管理
//!
//! 持有会话级 CancellationToken；每轮对话拿一个子 token，`cancel()` 取消所有进行中的轮次后换上新的根 token，
//! 之后的轮次不受影响。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：取消令牌
#[derive(Debug)]
pub struct SessionSupervisor {
    root: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(CancellationToken::new()),
        }
    }

    /// 为新的一轮创建子 token
    pub fn begin_turn(&self) -> CancellationToken {
        self.root
            .lock()
            .map(|root| root.child_token())
            .unwrap_or_else(|e| e.into_inner().child_token())
    }

    /// 取消所有进行中的轮次
    pub fn cancel(&self) {
        let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
        root.cancel();
        *root = CancellationToken::new();
        tracing::info!("session turns cancelled");
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
