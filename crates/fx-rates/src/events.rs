//! Rate 이벤트 발행.
//!
//! resolver가 의미 있는 일이 생길 때마다 등록된 리스너에게 동기적으로
//! 이벤트를 전달합니다. 리스너 실패는 격리됩니다. 한 리스너가 panic해도
//! 다른 리스너와 호출부는 영향을 받지 않습니다.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// 이벤트 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateEventKind {
    /// 환율이 새로 해석됨
    RateUpdated,
    /// 캐시가 비워짐
    CacheCleared,
    /// 업스트림 호출 실패
    ApiError,
    /// fallback 환율이 사용됨
    FallbackUsed,
}

/// 리스너에게 전달되는 이벤트.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateEvent {
    /// 이벤트 종류
    pub kind: RateEventKind,
    /// 발생 시각
    pub timestamp: DateTime<Utc>,
    /// 이벤트별 페이로드
    pub data: Value,
}

impl RateEvent {
    /// 새 이벤트를 생성합니다.
    pub fn new(kind: RateEventKind, data: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// 구독 해지용 핸들.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(Uuid);

type Listener = Box<dyn Fn(&RateEvent) + Send + Sync>;

/// 동기 이벤트 버스.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(Uuid, Listener)>>,
}

impl EventBus {
    /// 빈 버스를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 리스너를 등록하고 해지용 핸들을 반환합니다.
    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&RateEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.listeners
            .write()
            .unwrap()
            .push((id, Box::new(listener)));
        ListenerHandle(id)
    }

    /// 리스너를 해지합니다. 이미 해지된 핸들이면 `false`.
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != handle.0);
        listeners.len() < before
    }

    /// 등록된 리스너 수.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }

    /// 모든 리스너에게 이벤트를 전달합니다.
    ///
    /// panic한 리스너는 경고 로그만 남기고 건너뜁니다.
    pub fn emit(&self, event: RateEvent) {
        let listeners = self.listeners.read().unwrap();
        for (id, listener) in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(
                    listener_id = %id,
                    event_kind = ?event.kind,
                    "Event listener panicked"
                );
            }
        }
    }
}
