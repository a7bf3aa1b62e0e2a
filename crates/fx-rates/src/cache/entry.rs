//! 캐시 엔트리 타입.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use fx_core::FxError;

/// TTL이 붙은 캐시 엔트리.
///
/// Layered cache가 단독으로 소유합니다. 쓰기 시점에 생성되고 이후에는
/// 읽기 전용이며, 만료 sweep이나 명시적 evict로만 삭제됩니다.
/// `expiry > timestamp` 불변식이 항상 유지됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// 저장된 값
    pub data: T,
    /// 쓰기 시각 (ISO-8601로 직렬화)
    pub timestamp: DateTime<Utc>,
    /// 만료 시각
    pub expiry: DateTime<Utc>,
    /// 캐시 키
    pub key: String,
}

impl<T> CacheEntry<T> {
    /// 새 엔트리를 생성합니다. TTL은 양수여야 합니다.
    pub fn new(key: impl Into<String>, data: T, ttl: Duration) -> Result<Self, FxError> {
        if ttl <= Duration::zero() {
            return Err(FxError::cache(format!("TTL must be positive: {}", ttl)));
        }
        let now = Utc::now();
        Ok(Self {
            data,
            timestamp: now,
            expiry: now + ttl,
            key: key.into(),
        })
    }

    /// 엔트리가 만료되었는지 확인합니다.
    ///
    /// 소비자는 만료된 엔트리를 절대 보면 안 됩니다. 읽기 경로는 만료를
    /// miss로 취급하고 엔트리를 물리적으로 제거합니다.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}
