//! 幂等读操作的有界重试（指数退避）
//!
//! 只用于 get_run / list_messages 这类读操作；创建、发消息、提交输出等有副作用的调用从不重试，避免重复 Run。

use std::future::Future;
use std::time::Duration;

use crate::transport::TransportError;

/// 重试预算与退避参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// 首次失败之后最多再试几次
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// 第 attempt 次重试前的等待时间（从 0 计），翻倍增长并封顶
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// 执行幂等操作；仅对 `is_retryable` 的错误按预算重试
pub async fn retry_idempotent<T, F, Fut>(
    config: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = config.backoff_for(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient transport failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.backoff_for(0), Duration::from_millis(500));
        assert_eq!(cfg.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(cfg.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(cfg.backoff_for(10), Duration::from_secs(8));
        assert_eq!(cfg.backoff_for(40), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_idempotent(&fast(3), "get_run", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::Network("connection reset".into()))
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_idempotent(&fast(3), "get_run", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::NotFound("run_1".into()))
        })
        .await;

        assert!(matches!(result, Err(TransportError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_idempotent(&fast(2), "list_messages", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Http { status: 503, body: "busy".into() })
        })
        .await;

        assert!(matches!(result, Err(TransportError::Http { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
