//! 월간 API 호출 쿼터 추적.
//!
//! 업스트림 무료 플랜의 월간 호출 한도를 클라이언트 측에서 추적합니다.
//! 리셋은 lazy하게 처리됩니다. 즉 백그라운드 타이머 없이, 쿼터를 확인하는
//! 시점에 `reset_date`가 지났으면 카운터를 0으로 되돌립니다.
//! 상태는 tier-2 저장소에 best-effort로 영속화되어 재시작 후에도 이어집니다.

use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fx_core::{FxError, FxResult};

use crate::cache::PersistentStore;

/// 쿼터 상태 영속화 키.
const QUOTA_KEY: &str = "api_quota";

/// 월간 API 쿼터 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiQuota {
    /// 이번 달 사용량
    pub used: u32,
    /// 월간 한도
    pub limit: u32,
    /// 다음 리셋 시각 (다음 달 1일 00:00 UTC)
    pub reset_date: DateTime<Utc>,
}

impl ApiQuota {
    /// 새 쿼터를 생성합니다. 리셋 시각은 다음 달 초입니다.
    pub fn new(limit: u32) -> Self {
        Self {
            used: 0,
            limit,
            reset_date: next_month_start(Utc::now()),
        }
    }

    /// 남은 호출 횟수.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    /// 쿼터가 소진되었는지 확인.
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// 다음 달 1일 00:00 UTC.
fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    // 1일 00:00은 모든 달에 존재하므로 실패하지 않음
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}

/// 월간 쿼터 추적기.
pub struct QuotaTracker {
    quota: Mutex<ApiQuota>,
    store: Option<Arc<dyn PersistentStore>>,
}

impl QuotaTracker {
    /// 새 추적기를 생성합니다.
    pub fn new(limit: u32, store: Option<Arc<dyn PersistentStore>>) -> Self {
        Self {
            quota: Mutex::new(ApiQuota::new(limit)),
            store,
        }
    }

    /// 추적기를 생성하면서 영속화된 상태를 바로 복원합니다.
    pub async fn restored(limit: u32, store: Arc<dyn PersistentStore>) -> Self {
        let tracker = Self::new(limit, Some(store));
        tracker.restore().await;
        tracker
    }

    /// tier-2 저장소에서 이전 쿼터 상태를 복원합니다.
    ///
    /// 복원은 best-effort입니다. 저장소 오류나 손상된 데이터는 경고만
    /// 남기고 새 쿼터로 시작합니다. 설정의 한도가 우선합니다.
    pub async fn restore(&self) {
        let Some(store) = &self.store else { return };

        match store.get(QUOTA_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<ApiQuota>(&raw) {
                Ok(saved) => {
                    let mut quota = self.quota.lock().await;
                    quota.used = saved.used;
                    quota.reset_date = saved.reset_date;
                    info!(used = quota.used, limit = quota.limit, "Restored API quota state");
                }
                Err(e) => warn!(error = %e, "Corrupt persisted quota state, starting fresh"),
            },
            Ok(None) => debug!("No persisted quota state"),
            Err(e) => warn!(error = %e, "Failed to restore quota state"),
        }
    }

    /// 업스트림 호출이 가능한지 확인합니다 (lazy 리셋 포함).
    ///
    /// 한도가 소진되었으면 `QuotaExceeded`를 반환합니다. 카운터는
    /// 소비하지 않습니다. 성공한 호출만 [`record_call`](Self::record_call)로
    /// 집계합니다.
    pub async fn can_use_api(&self) -> FxResult<()> {
        let mut quota = self.quota.lock().await;
        Self::maybe_reset(&mut quota);

        if quota.is_exhausted() {
            return Err(FxError::quota_exceeded(
                quota.used,
                quota.limit,
                quota.reset_date,
            ));
        }
        Ok(())
    }

    /// 성공한 업스트림 호출 1회를 집계합니다.
    pub async fn record_call(&self) {
        let snapshot = {
            let mut quota = self.quota.lock().await;
            Self::maybe_reset(&mut quota);
            quota.used += 1;
            quota.clone()
        };
        self.persist(&snapshot).await;
    }

    /// 현재 쿼터 스냅샷 (lazy 리셋 포함).
    pub async fn status(&self) -> ApiQuota {
        let mut quota = self.quota.lock().await;
        Self::maybe_reset(&mut quota);
        quota.clone()
    }

    /// 리셋 시각이 지났으면 카운터를 되돌립니다.
    fn maybe_reset(quota: &mut ApiQuota) {
        let now = Utc::now();
        if now >= quota.reset_date {
            info!(
                used = quota.used,
                limit = quota.limit,
                "Monthly quota reset"
            );
            quota.used = 0;
            quota.reset_date = next_month_start(now);
        }
    }

    /// 쿼터 상태를 best-effort로 영속화합니다.
    async fn persist(&self, quota: &ApiQuota) {
        let Some(store) = &self.store else { return };

        match serde_json::to_string(quota) {
            Ok(raw) => {
                if let Err(e) = store.set(QUOTA_KEY, &raw).await {
                    warn!(error = %e, "Failed to persist quota state");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize quota state"),
        }
    }
}
