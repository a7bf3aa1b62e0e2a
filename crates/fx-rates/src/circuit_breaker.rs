//! Circuit Breaker pattern implementation.
//!
//! 업스트림 환율 제공자 장애 시 연쇄 실패를 방지합니다. 실패 카운터가
//! 의미를 가지려면 호출 간에 누적되어야 하므로, 업스트림 의존성 하나당
//! breaker 인스턴스는 정확히 하나여야 합니다.
//!
//! # 상태 전이
//!
//! ```text
//! Closed ──[실패 임계치 도달]──> Open
//!    ↑                            │
//!    │                   [타임아웃 경과]
//!    │                            ↓
//!    └──[성공]── HalfOpen ──[실패]──> Open
//! ```
//!
//! HalfOpen에서는 복구 확인용 시험 호출을 정확히 하나만 통과시킵니다.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use fx_core::{FxError, FxResult};

/// Circuit Breaker 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// 정상 상태 - 모든 요청 허용
    Closed,
    /// 장애 상태 - 모든 요청 즉시 거부
    Open,
    /// 복구 테스트 상태 - 시험 요청 하나만 허용
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit Breaker 설정.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Open으로 전이하는 연속 실패 임계치
    pub failure_threshold: u32,
    /// Open 상태 유지 시간 (이후 HalfOpen으로 전이)
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit Breaker 내부 상태.
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
    /// HalfOpen 시험 호출 진행 중 여부
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_state_change: Instant::now(),
            probe_in_flight: false,
        }
    }
}

/// 업스트림 의존성 하나를 지키는 Circuit Breaker.
pub struct CircuitBreaker {
    /// 의존성 이름 (로깅/메트릭용)
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    open_count: AtomicU64,
}

impl CircuitBreaker {
    /// 새 Circuit Breaker 생성.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(BreakerState::new()),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            open_count: AtomicU64::new(0),
        }
    }

    /// 기본 설정으로 생성.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// 의존성 이름 반환.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 현재 상태 반환 (타임아웃 경과 시 Open → HalfOpen 전이 포함).
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.write().unwrap();
        self.maybe_transition_from_open(&mut state);
        state.state
    }

    /// 작업을 breaker 뒤에서 실행합니다.
    ///
    /// Open 상태에서 타임아웃이 지나지 않았으면 작업을 호출하지 않고
    /// 즉시 합성 `UpstreamUnavailable` 에러(재시도 가능, fallback 가능)를
    /// 반환합니다.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> FxResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FxResult<T>>,
    {
        if !self.try_acquire() {
            return Err(FxError::upstream_unavailable(format!(
                "Circuit breaker '{}' is open",
                self.name
            ))
            .with_detail("circuit_breaker", &self.name));
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// 요청 허용 여부를 확인하고, HalfOpen이면 시험 호출 슬롯을 점유합니다.
    fn try_acquire(&self) -> bool {
        let mut state = self.state.write().unwrap();
        self.maybe_transition_from_open(&mut state);

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    false
                } else {
                    state.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// 성공 기록. HalfOpen에서 성공하면 Closed로 전이합니다.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().unwrap();
        match state.state {
            CircuitState::HalfOpen => {
                self.transition_to(&mut state, CircuitState::Closed);
                tracing::info!(
                    circuit_breaker = %self.name,
                    "Circuit breaker recovered: HalfOpen -> Closed"
                );
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                // Open 상태에서는 요청이 거부되므로 발생하지 않아야 함
            }
        }
    }

    /// 실패 기록. 임계치에 도달하면 Open으로 전이합니다.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().unwrap();
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    self.transition_to(&mut state, CircuitState::Open);
                    self.open_count.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        circuit_breaker = %self.name,
                        failure_count = state.failure_count,
                        "Circuit breaker tripped: Closed -> Open"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(&mut state, CircuitState::Open);
                self.open_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    circuit_breaker = %self.name,
                    "Circuit breaker recovery failed: HalfOpen -> Open"
                );
            }
            CircuitState::Open => {
                // 이미 Open 상태
            }
        }
    }

    /// 수동으로 Circuit 리셋.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        self.transition_to(&mut state, CircuitState::Closed);
        tracing::info!(circuit_breaker = %self.name, "Circuit breaker manually reset");
    }

    /// 메트릭 반환.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state.read().unwrap();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            open_count: self.open_count.load(Ordering::Relaxed),
            time_in_current_state: state.last_state_change.elapsed(),
        }
    }

    /// Open 상태에서 타임아웃이 경과했으면 HalfOpen으로 전이.
    fn maybe_transition_from_open(&self, state: &mut BreakerState) {
        if state.state == CircuitState::Open {
            let since_failure = state
                .last_failure_time
                .unwrap_or(state.last_state_change)
                .elapsed();
            if since_failure >= self.config.reset_timeout {
                self.transition_to(state, CircuitState::HalfOpen);
                tracing::info!(
                    circuit_breaker = %self.name,
                    "Circuit breaker timeout: Open -> HalfOpen"
                );
            }
        }
    }

    /// 상태 전이.
    fn transition_to(&self, state: &mut BreakerState, new_state: CircuitState) {
        state.state = new_state;
        state.last_state_change = Instant::now();
        state.probe_in_flight = false;

        if new_state == CircuitState::Closed {
            state.failure_count = 0;
        }
    }
}

/// Circuit Breaker 메트릭.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    /// 의존성 이름
    pub name: String,
    /// 현재 상태
    pub state: CircuitState,
    /// 현재 연속 실패 횟수
    pub failure_count: u32,
    /// 총 실패 횟수
    pub total_failures: u64,
    /// 총 성공 횟수
    pub total_successes: u64,
    /// Circuit Open 횟수
    pub open_count: u64,
    /// 현재 상태 유지 시간
    pub time_in_current_state: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::thread;

    fn short_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_initial_state_is_closed() {
        let cb = CircuitBreaker::with_defaults("fixer");
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_opens_after_failure_threshold() {
        let cb = CircuitBreaker::with_defaults("fixer");

        for _ in 0..4 {
            cb.record_failure();
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::with_defaults("fixer");

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_after_reset_timeout() {
        let cb = CircuitBreaker::new("fixer", short_config());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_allows_exactly_one_probe() {
        let cb = CircuitBreaker::new("fixer", short_config());

        cb.record_failure();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.try_acquire());
        // 시험 호출이 끝나기 전에는 두 번째 요청 거부
        assert!(!cb.try_acquire());
    }

    #[test]
    fn test_recovers_on_successful_probe() {
        let cb = CircuitBreaker::new("fixer", short_config());

        cb.record_failure();
        thread::sleep(Duration::from_millis(60));
        assert!(cb.try_acquire());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = CircuitBreaker::new("fixer", short_config());

        cb.record_failure();
        thread::sleep(Duration::from_millis(60));
        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_manual_reset() {
        let cb = CircuitBreaker::new(
            "fixer",
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(300),
            },
        );

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_metrics() {
        let cb = CircuitBreaker::with_defaults("fixer");

        cb.record_success();
        cb.record_success();
        cb.record_failure();

        let metrics = cb.metrics();
        assert_eq!(metrics.name, "fixer");
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.total_successes, 2);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.open_count, 0);
    }

    #[tokio::test]
    async fn test_execute_rejects_without_invoking_when_open() {
        let cb = CircuitBreaker::new(
            "fixer",
            CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(300),
            },
        );
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _: FxResult<u32> = cb
                .execute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FxError::network("down"))
                })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let result: FxResult<u32> = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), fx_core::ErrorKind::UpstreamUnavailable);
        assert!(err.is_retryable());
        assert!(err.has_fallback());
        // Open 상태에서는 작업이 아예 호출되지 않음
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_execute_records_success() {
        let cb = CircuitBreaker::with_defaults("fixer");
        let result: FxResult<u32> = cb.execute(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(cb.metrics().total_successes, 1);
    }
}
