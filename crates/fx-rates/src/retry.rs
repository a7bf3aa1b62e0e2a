//! 지수 backoff 재시도 정책.
//!
//! 단일 작업을 감싸 재시도합니다. 에러 분류 체계의 `retryable` 플래그를
//! 따르므로 검증 에러 같은 비재시도성 에러는 즉시 다시 던집니다.
//! `RateLimitExceeded`가 한도 해제 시각을 실어 오고 그 시각이 `max_delay`
//! 보다 가까우면 backoff 대신 정확히 해제 시각까지 대기합니다.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use fx_core::{ErrorKind, FxResult};

/// 재시도 정책 설정.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 첫 재시도 전 대기 시간
    pub base_delay: Duration,
    /// 대기 시간 상한
    pub max_delay: Duration,
    /// backoff 배수
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 시도 횟수만 바꾼 정책을 생성합니다.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// `attempt`번째 실패 후의 backoff 대기 시간.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    /// 작업을 실행하고 재시도 가능한 실패를 backoff와 함께 재시도합니다.
    ///
    /// 성공하면 즉시 반환하고, 비재시도성 에러는 바로 다시 던지며,
    /// `max_attempts`에 도달하면 마지막 에러를 던집니다.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> FxResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FxResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.delay_for(&err, attempt);
            debug!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// 다음 재시도 전 대기 시간을 계산합니다.
    fn delay_for(&self, err: &fx_core::FxError, attempt: u32) -> Duration {
        if err.kind() == ErrorKind::RateLimitExceeded {
            if let Some(reset) = err.reset_time() {
                if let Ok(until_reset) = (reset - Utc::now()).to_std() {
                    if until_reset < self.max_delay {
                        // 한도 해제 시각까지 정확히 대기
                        return until_reset;
                    }
                }
            }
        }
        self.backoff(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fx_core::FxError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_retryable_failures() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = policy
            .execute(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(FxError::network("flaky"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_invokes_once() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: FxResult<u32> = policy
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FxError::invalid_currency("QQQ"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidCurrency);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_and_raises_last_error() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: FxResult<u32> = policy
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FxError::network("always down"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::NetworkError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_progression_capped() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 2.0,
        };

        let start = tokio::time::Instant::now();
        let _: FxResult<u32> = policy
            .execute(|| async { Err(FxError::network("down")) })
            .await;

        // 1s + 2s + 3s(상한 적용, 4s 아님) = 6s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_until_reset_time() {
        let policy = RetryPolicy::default();
        let reset = Utc::now() + chrono::Duration::milliseconds(500);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let start = tokio::time::Instant::now();
        let result = policy
            .execute(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(FxError::rate_limit_exceeded("fixer", Some(reset)))
                    } else {
                        Ok(1u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        // backoff(1초)가 아닌 reset 시각(~0.5초)까지만 대기
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(900), "waited {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_with_distant_reset_uses_backoff() {
        let policy = RetryPolicy::default();
        let reset = Utc::now() + chrono::Duration::seconds(3600);

        let start = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = policy
            .execute(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(FxError::rate_limit_exceeded("fixer", Some(reset)))
                    } else {
                        Ok(1u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        // 1시간 뒤 reset은 max_delay보다 머니까 일반 backoff(1초) 적용
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
    }
}
