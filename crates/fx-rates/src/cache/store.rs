//! 영속 key/value 저장소 (tier-2) 추상화.
//!
//! Layered cache의 두 번째 계층입니다. 프로세스 재시작에도 살아남는
//! 네임스페이스 분리된 문자열 key/value 인터페이스만 요구하므로,
//! 운영에서는 Redis를, 테스트에서는 in-memory 구현을 씁니다.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tokio::sync::RwLock;
use tracing::info;

use fx_core::{FxError, FxResult, RedisConfig};

/// 영속 key/value 저장소.
///
/// 키는 저장소 구현이 자체 네임스페이스 아래에 둡니다. 호출부가 넘기는
/// 키는 네임스페이스 없는 논리 키입니다 (예: `exchange_rate_USD_NGN`).
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// 값을 조회합니다. 없으면 `None`.
    async fn get(&self, key: &str) -> FxResult<Option<String>>;
    /// 값을 저장합니다.
    async fn set(&self, key: &str, value: &str) -> FxResult<()>;
    /// 키를 삭제합니다.
    async fn remove(&self, key: &str) -> FxResult<()>;
    /// 접두사로 시작하는 논리 키들을 나열합니다.
    async fn keys(&self, prefix: &str) -> FxResult<Vec<String>>;
    /// 접두사로 시작하는 키를 전부 삭제합니다. 삭제된 개수를 반환합니다.
    async fn clear(&self, prefix: &str) -> FxResult<usize>;
}

/// Redis 기반 tier-2 저장소.
#[derive(Clone)]
pub struct RedisStore {
    connection: Arc<RwLock<MultiplexedConnection>>,
    namespace: String,
}

impl RedisStore {
    /// 새 Redis 저장소 연결을 생성합니다.
    pub async fn connect(config: &RedisConfig) -> FxResult<Self> {
        info!(url = %config.url, "Connecting to Redis...");

        let client =
            Client::open(config.url.as_str()).map_err(|e| FxError::cache(e.to_string()))?;

        let connection = tokio::time::timeout(
            std::time::Duration::from_secs(config.connection_timeout_secs),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| FxError::cache("Redis connection timeout"))?
        .map_err(|e| FxError::cache(e.to_string()))?;

        info!("Redis connection established");

        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
            namespace: config.namespace.clone(),
        })
    }

    /// 논리 키에 네임스페이스를 붙입니다.
    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// 네임스페이스 접두사를 벗겨 논리 키로 되돌립니다.
    fn strip(&self, key: &str) -> Option<String> {
        key.strip_prefix(&format!("{}:", self.namespace))
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl PersistentStore for RedisStore {
    async fn get(&self, key: &str) -> FxResult<Option<String>> {
        let mut conn = self.connection.write().await;
        conn.get(self.namespaced(key))
            .await
            .map_err(|e| FxError::cache(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> FxResult<()> {
        let mut conn = self.connection.write().await;
        let _: () = conn
            .set(self.namespaced(key), value)
            .await
            .map_err(|e| FxError::cache(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> FxResult<()> {
        let mut conn = self.connection.write().await;
        let _: i64 = conn
            .del(self.namespaced(key))
            .await
            .map_err(|e| FxError::cache(e.to_string()))?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> FxResult<Vec<String>> {
        let mut conn = self.connection.write().await;
        let pattern = format!("{}:{}*", self.namespace, prefix);
        let keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| FxError::cache(e.to_string()))?;
        Ok(keys.iter().filter_map(|k| self.strip(k)).collect())
    }

    async fn clear(&self, prefix: &str) -> FxResult<usize> {
        let mut conn = self.connection.write().await;
        let pattern = format!("{}:{}*", self.namespace, prefix);
        let keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| FxError::cache(e.to_string()))?;

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: i64 = conn
            .del(&keys)
            .await
            .map_err(|e| FxError::cache(e.to_string()))?;
        Ok(deleted as usize)
    }
}

/// in-memory tier-2 저장소.
///
/// 테스트 및 Redis 없는 단독 실행용입니다. 프로세스 재시작에는 당연히
/// 살아남지 못하지만 인터페이스 계약은 동일합니다.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> FxResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> FxResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> FxResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> FxResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn clear(&self, prefix: &str) -> FxResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_keys_and_clear() {
        let store = MemoryStore::new();
        store.set("exchange_rate_USD_NGN", "{}").await.unwrap();
        store.set("exchange_rate_USD_CAD", "{}").await.unwrap();
        store.set("rates_bulk_USD", "{}").await.unwrap();

        let mut keys = store.keys("exchange_rate_").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["exchange_rate_USD_CAD", "exchange_rate_USD_NGN"]
        );

        let deleted = store.clear("exchange_rate_").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.keys("").await.unwrap(), vec!["rates_bulk_USD"]);
    }
}
