//! 환율 해석 엔진.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - RateResolver: 캐시 → 실시간 → fallback 해석 오케스트레이터
//! - LayeredCache: in-process + 영속 저장소 2계층 캐시
//! - FallbackRateTable: USD cross-rate 기반 정적 환율 테이블
//! - RetryPolicy / CircuitBreaker: 업스트림 장애 허용
//! - QuotaTracker: 월간 API 호출 한도 추적
//! - EventBus: 해석 이벤트 발행

pub mod cache;
pub mod circuit_breaker;
pub mod events;
pub mod fallback;
pub mod quota;
pub mod resolver;
pub mod retry;
pub mod upstream;

pub use cache::{CacheEntry, CacheStats, LayeredCache, MemoryStore, PersistentStore, RedisStore};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use events::{EventBus, ListenerHandle, RateEvent, RateEventKind};
pub use fallback::FallbackRateTable;
pub use quota::{ApiQuota, QuotaTracker};
pub use resolver::{RateResolver, ResolveOptions, Strategy};
pub use retry::RetryPolicy;
pub use upstream::{HttpRateProvider, RateProvider};
