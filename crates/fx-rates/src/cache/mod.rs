//! 2계층 환율 캐시.
//!
//! - **Tier 1**: in-process map. 가장 빠르고 용량 제한이 있으며, 넘치면
//!   timestamp가 가장 오래된 엔트리 하나를 내보냅니다.
//! - **Tier 2**: 영속 key/value 저장소. 프로세스 재시작에도 살아남고,
//!   유효한 hit는 tier 1로 승격됩니다.
//!
//! 읽기는 tier 1 → tier 2 순서로 확인하고, 쓰기는 두 계층 모두에
//! 기록합니다. 만료된 엔트리는 읽기 시점에 miss로 취급해 물리적으로
//! 제거하고(lazy deletion), `TTL/4` 주기의 background sweep이 틱마다
//! 제한된 개수만 추가로 청소합니다.
//!
//! 캐시 쓰기는 best-effort입니다. tier-2 쓰기 실패 시 자기 소유 키들을
//! 한 번 비우고 한 번 더 써본 뒤 조용히 포기하며, 어떤 경우에도 사용자
//! 에러로 전파되지 않습니다. tier-2 저장소는 다른 소유자(쿼터 기록 등)와
//! 공유될 수 있으므로 정리 작업은 캐시 소유 접두사로만 한정됩니다.

pub mod entry;
pub mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use fx_core::{CurrencyCode, ExchangeRate, RateSource};

pub use entry::CacheEntry;
pub use store::{MemoryStore, PersistentStore, RedisStore};

/// sweep 한 번에 제거하는 최대 엔트리 수.
const SWEEP_BATCH: usize = 16;

/// tier-2에서 이 캐시가 소유하는 키 접두사.
///
/// tier-2 저장소는 쿼터 기록 같은 다른 소유자의 키와 공유될 수 있으므로,
/// clear/sweep/stats는 반드시 이 접두사 아래의 키만 건드립니다.
const KEY_PREFIXES: [&str; 2] = ["exchange_rate_", "rates_bulk_"];

/// 캐시 통계.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// tier-1 엔트리 수
    pub memory_entries: usize,
    /// tier-2 엔트리 수
    pub persistent_entries: usize,
    /// tier-1 직렬화 크기 추정치 (바이트)
    pub size_estimate_bytes: usize,
    /// 가장 오래된 tier-1 엔트리의 기록 시각
    pub oldest: Option<DateTime<Utc>>,
    /// 가장 최근 tier-1 엔트리의 기록 시각
    pub newest: Option<DateTime<Utc>>,
}

/// 2계층 환율 캐시.
pub struct LayeredCache {
    /// tier-1 in-process 엔트리
    memory: Mutex<HashMap<String, CacheEntry<serde_json::Value>>>,
    /// tier-2 영속 저장소
    store: Arc<dyn PersistentStore>,
    /// tier-1 최대 엔트리 수
    capacity: usize,
    /// 기본 TTL
    default_ttl: Duration,
}

impl LayeredCache {
    /// 새 캐시를 생성합니다.
    pub fn new(store: Arc<dyn PersistentStore>, capacity: usize, default_ttl_secs: u64) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            store,
            capacity: capacity.max(1),
            default_ttl: Duration::seconds(default_ttl_secs.max(1) as i64),
        }
    }

    /// 환율 쌍 캐시 키.
    pub fn rate_key(from: &CurrencyCode, to: &CurrencyCode) -> String {
        format!("exchange_rate_{}_{}", from, to)
    }

    /// bulk 환율 캐시 키.
    pub fn bulk_key(base: &CurrencyCode) -> String {
        format!("rates_bulk_{}", base)
    }

    /// 기본 TTL을 반환합니다.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 캐시에서 값을 읽습니다. 만료/오류는 모두 miss로 강등됩니다.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Utc::now();

        // Tier 1
        {
            let mut memory = self.memory.lock().unwrap();
            if let Some(entry) = memory.get(key) {
                if entry.is_expired(now) {
                    memory.remove(key);
                } else {
                    let value = entry.data.clone();
                    drop(memory);
                    return serde_json::from_value(value).ok();
                }
            }
        }

        // Tier 2
        let json = match self.store.get(key).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                debug!(key, error = %e, "Tier-2 cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry<serde_json::Value> = match serde_json::from_str(&json) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(key, error = %e, "Corrupt tier-2 cache entry, removing");
                let _ = self.store.remove(key).await;
                return None;
            }
        };

        if entry.is_expired(now) {
            let _ = self.store.remove(key).await;
            return None;
        }

        // 유효한 tier-2 hit는 tier 1로 승격
        let value = entry.data.clone();
        self.insert_memory(key.to_string(), entry);
        serde_json::from_value(value).ok()
    }

    /// 캐시에 값을 씁니다 (두 계층 모두, best-effort).
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(key, error = %e, "Cache value serialization failed, skipping write");
                return;
            }
        };
        let entry = match CacheEntry::new(key, data, ttl) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Cache entry construction failed, skipping write");
                return;
            }
        };

        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Cache entry serialization failed, skipping write");
                return;
            }
        };

        self.insert_memory(key.to_string(), entry);
        self.write_tier2(key, &json).await;
    }

    /// tier-1 삽입 (용량 초과 시 가장 오래된 엔트리 하나 제거).
    fn insert_memory(&self, key: String, entry: CacheEntry<serde_json::Value>) {
        let mut memory = self.memory.lock().unwrap();
        if !memory.contains_key(&key) && memory.len() >= self.capacity {
            if let Some(oldest) = memory
                .iter()
                .min_by_key(|(_, e)| e.timestamp)
                .map(|(k, _)| k.clone())
            {
                memory.remove(&oldest);
            }
        }
        memory.insert(key, entry);
    }

    /// tier-2 쓰기: 실패하면 자기 소유 키들을 한 번 비우고 한 번 더
    /// 시도한 뒤 조용히 포기합니다.
    async fn write_tier2(&self, key: &str, json: &str) {
        if let Err(e) = self.store.set(key, json).await {
            warn!(key, error = %e, "Tier-2 cache write failed, clearing own entries and retrying once");
            for prefix in KEY_PREFIXES {
                let _ = self.store.clear(prefix).await;
            }
            if let Err(e) = self.store.set(key, json).await {
                warn!(key, error = %e, "Tier-2 cache write dropped");
            }
        }
    }

    /// 단일 쌍 환율을 읽습니다.
    pub async fn get_rate(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> Option<ExchangeRate> {
        self.get(&Self::rate_key(from, to)).await
    }

    /// 단일 쌍 환율을 기본 TTL로 기록합니다.
    pub async fn set_rate(&self, rate: &ExchangeRate) {
        let key = Self::rate_key(&rate.from, &rate.to);
        self.set(&key, rate, self.default_ttl).await;
    }

    /// base 통화의 bulk 환율 맵을 읽습니다.
    pub async fn get_bulk(&self, base: &CurrencyCode) -> Option<HashMap<CurrencyCode, f64>> {
        self.get(&Self::bulk_key(base)).await
    }

    /// bulk 환율을 기록합니다.
    ///
    /// 복합 엔트리 하나에 더해 개별 쌍 엔트리로도 전개하므로, 이후의
    /// 단일 쌍 조회가 bulk 재조회 없이 hit할 수 있습니다.
    pub async fn set_bulk(
        &self,
        base: &CurrencyCode,
        rates: &HashMap<CurrencyCode, f64>,
        source: RateSource,
    ) {
        self.set(&Self::bulk_key(base), rates, self.default_ttl)
            .await;

        let valid_until = Utc::now() + self.default_ttl;
        for (target, value) in rates {
            if let Ok(rate) = ExchangeRate::new(base.clone(), target.clone(), *value, source) {
                self.set_rate(&rate.with_valid_until(valid_until)).await;
            }
        }
    }

    /// 키 하나를 두 계층 모두에서 제거합니다.
    pub async fn evict(&self, key: &str) {
        self.memory.lock().unwrap().remove(key);
        if let Err(e) = self.store.remove(key).await {
            debug!(key, error = %e, "Tier-2 cache evict failed");
        }
    }

    /// 캐시 전체를 비웁니다.
    ///
    /// tier-2에서는 캐시 소유 접두사 아래의 키만 제거합니다. 같은
    /// 저장소를 쓰는 다른 기록(예: 쿼터)은 건드리지 않습니다.
    pub async fn clear(&self) {
        self.memory.lock().unwrap().clear();
        for prefix in KEY_PREFIXES {
            if let Err(e) = self.store.clear(prefix).await {
                warn!(prefix, error = %e, "Tier-2 cache clear failed");
            }
        }
    }

    /// 캐시 통계를 수집합니다.
    pub async fn stats(&self) -> CacheStats {
        let (memory_entries, size_estimate_bytes, oldest, newest) = {
            let memory = self.memory.lock().unwrap();
            let size: usize = memory
                .values()
                .map(|e| e.key.len() + e.data.to_string().len())
                .sum();
            let oldest = memory.values().map(|e| e.timestamp).min();
            let newest = memory.values().map(|e| e.timestamp).max();
            (memory.len(), size, oldest, newest)
        };

        let mut persistent_entries = 0;
        for prefix in KEY_PREFIXES {
            persistent_entries += self.store.keys(prefix).await.map(|k| k.len()).unwrap_or(0);
        }

        CacheStats {
            memory_entries,
            persistent_entries,
            size_estimate_bytes,
            oldest,
            newest,
        }
    }

    /// 만료된 엔트리를 한 번 청소합니다 (틱당 최대 `SWEEP_BATCH`개).
    ///
    /// tier-1 락은 키 수집 동안만 잡고, tier-2 I/O 중에는 잡지 않습니다.
    pub async fn sweep_once(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        let expired_memory: Vec<String> = {
            let memory = self.memory.lock().unwrap();
            memory
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .take(SWEEP_BATCH)
                .collect()
        };
        {
            let mut memory = self.memory.lock().unwrap();
            for key in &expired_memory {
                memory.remove(key);
                removed += 1;
            }
        }

        // tier-2는 캐시 소유 접두사 아래에서, 남은 예산만큼만 검사
        let budget = SWEEP_BATCH.saturating_sub(removed);
        if budget > 0 {
            let mut checked = 0;
            'prefixes: for prefix in KEY_PREFIXES {
                let Ok(keys) = self.store.keys(prefix).await else {
                    continue;
                };
                for key in keys {
                    if checked >= budget {
                        break 'prefixes;
                    }
                    checked += 1;
                    if let Ok(Some(json)) = self.store.get(&key).await {
                        let expired = serde_json::from_str::<CacheEntry<serde_json::Value>>(&json)
                            .map(|e| e.is_expired(now))
                            .unwrap_or(true);
                        if expired {
                            let _ = self.store.remove(&key).await;
                            removed += 1;
                        }
                    }
                }
            }
        }

        if removed > 0 {
            debug!(removed, "Cache sweep removed expired entries");
        }
        removed
    }

    /// `TTL/4` 주기의 background sweep 태스크를 띄웁니다.
    pub fn spawn_sweeper(cache: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = (cache.default_ttl / 4)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(900))
            .max(std::time::Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.sweep_once().await;
            }
        })
    }
}
