//! 指数退避重试
//!
//! 第 n 次失败后等待 `base × 2^(n-1) + random(0, jitter)`，默认共 3 次。
//! 只有 `is_retryable()` 的错误才会重试，其余立即返回。

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::translation::config::{constants, PipelineConfig};
use crate::translation::error::{TranslationError, TranslationResult};

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（包括第一次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_jitter: constants::RETRY_MAX_JITTER,
        }
    }

    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// 只尝试一次
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO).with_jitter(Duration::ZERO)
    }

    /// 第 `failed_attempt` 次（从 1 开始）失败后的等待时间
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        backoff + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(constants::RETRY_ATTEMPTS, constants::RETRY_BASE_DELAY)
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_base_delay())
            .with_jitter(config.retry_max_jitter())
    }
}

/// 带重试地执行异步操作
///
/// 用尽次数后返回 `RetryExhausted`，携带尝试次数和最后一次错误。
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> TranslationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TranslationResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "{}: 第 {}/{} 次尝试成功",
                        operation_name, attempt, policy.max_attempts
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                debug!("{}: 错误不可重试，立即失败: {}", operation_name, e);
                return Err(e);
            }
            Err(e) if attempt >= policy.max_attempts => {
                warn!(
                    "{}: {} 次尝试全部失败，最后错误: {}",
                    operation_name, attempt, e
                );
                return Err(TranslationError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{}: 第 {}/{} 次尝试失败 ({})，{:?} 后重试",
                    operation_name, attempt, policy.max_attempts, e, delay
                );
                sleep(delay).await;
            }
        }
    }
}
