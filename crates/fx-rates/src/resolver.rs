//! 환율 해석 오케스트레이터.
//!
//! 캐시, 실시간 제공자, 정적 fallback 테이블을 전략에 따라 조합합니다.
//! 업스트림 호출은 항상 쿼터 확인 → circuit breaker → 재시도 순서의
//! 파이프라인을 거치며, 실패 시 fallback 테이블로 강등됩니다.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn, Instrument};

use fx_core::{
    CurrencyCode, CurrencyConversion, ExchangeRate, FxError, FxResult, RateSource, ResolverConfig,
};

use crate::cache::{CacheStats, LayeredCache};
use crate::circuit_breaker::CircuitBreaker;
use crate::events::{EventBus, ListenerHandle, RateEvent, RateEventKind};
use crate::fallback::FallbackRateTable;
use crate::quota::{ApiQuota, QuotaTracker};
use crate::retry::RetryPolicy;
use crate::upstream::RateProvider;

/// 해석 전략.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// 캐시만 사용 (miss면 fallback)
    Cached,
    /// 실시간 제공자 우선
    Realtime,
    /// fallback 테이블만 사용
    Fallback,
    /// 캐시 → 실시간 → fallback 순서
    #[default]
    Hybrid,
}

/// 해석 옵션.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// 해석 전략
    pub strategy: Strategy,
    /// 캐시 hit로 인정하는 최대 나이 (없으면 캐시 TTL)
    pub max_age: Option<Duration>,
    /// 캐시를 건너뛰고 강제로 새로 해석
    pub force_refresh: bool,
    /// 실시간 조회 실패 시 fallback으로 강등할지 여부
    pub fallback_on_error: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_age: None,
            force_refresh: false,
            fallback_on_error: true,
        }
    }
}

impl ResolveOptions {
    /// 전략만 바꾼 옵션을 생성합니다.
    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }
}

/// 환율 resolver.
///
/// 구성 시점에 협력자를 전부 주입받고, 이후에는 불변입니다.
pub struct RateResolver {
    config: ResolverConfig,
    cache: Arc<LayeredCache>,
    fallback: FallbackRateTable,
    provider: Option<Arc<dyn RateProvider>>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    quota: QuotaTracker,
    events: EventBus,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl RateResolver {
    /// 새 resolver를 생성합니다.
    ///
    /// `provider`가 `None`이면 실시간 조회 없이 캐시/fallback으로만
    /// 동작합니다.
    pub fn new(
        config: ResolverConfig,
        cache: Arc<LayeredCache>,
        fallback: FallbackRateTable,
        provider: Option<Arc<dyn RateProvider>>,
        quota: QuotaTracker,
    ) -> Self {
        let breaker_name = provider
            .as_ref()
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| "upstream".to_string());

        // TTL/4 주기 background sweep. 런타임 밖에서 생성되면 생략되고,
        // 만료 엔트리는 읽기 시점의 lazy 제거로만 청소됩니다.
        let sweeper = tokio::runtime::Handle::try_current()
            .ok()
            .map(|_| LayeredCache::spawn_sweeper(cache.clone()));

        Self {
            retry: RetryPolicy::with_attempts(config.retry_attempts),
            breaker: CircuitBreaker::with_defaults(breaker_name),
            config,
            cache,
            fallback,
            provider,
            quota,
            events: EventBus::new(),
            sweeper,
        }
    }

    /// 통화쌍 환율을 해석합니다.
    ///
    /// 1. 동일 통화는 I/O 없이 항등 환율을 반환합니다.
    /// 2. Cached/Hybrid 전략은 캐시를 먼저 확인합니다 (`max_age` 이내만 hit).
    /// 3. Realtime/Hybrid 전략은 쿼터가 허용하면 업스트림을 호출합니다.
    /// 4. 나머지는 fallback 테이블로 강등됩니다.
    pub async fn resolve_rate(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        options: &ResolveOptions,
    ) -> FxResult<ExchangeRate> {
        let span = fx_core::pair_span!("resolve_rate", from, to, options.strategy);
        self.resolve_rate_inner(from, to, options)
            .instrument(span)
            .await
    }

    async fn resolve_rate_inner(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        options: &ResolveOptions,
    ) -> FxResult<ExchangeRate> {
        if from == to {
            return Ok(ExchangeRate::identity(from.clone()));
        }

        // 1단계: 캐시
        if !options.force_refresh
            && matches!(options.strategy, Strategy::Cached | Strategy::Hybrid)
        {
            if let Some(rate) = self.cache.get_rate(from, to).await {
                let max_age = options.max_age.unwrap_or_else(|| self.cache.default_ttl());
                if rate.age(Utc::now()) <= max_age {
                    debug!(from = %from, to = %to, rate = rate.rate, "Cache hit");
                    return Ok(rate);
                }
                debug!(from = %from, to = %to, "Cached rate too old, re-resolving");
            }
        }

        // 2단계: 실시간 업스트림
        let mut last_error: Option<FxError> = None;
        if matches!(options.strategy, Strategy::Realtime | Strategy::Hybrid) {
            match self.fetch_realtime(from, to).await {
                Some(Ok(rate)) => return Ok(rate),
                Some(Err(err)) => {
                    if !options.fallback_on_error {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                None => {}
            }
        }

        // 3단계: fallback 테이블
        // (실시간 실패로 fallback_on_error=false였다면 위에서 이미 반환됨)
        if self.config.fallback_enabled {
            if let Some(value) = self.fallback.get_rate(from, to) {
                let rate = ExchangeRate::new(from.clone(), to.clone(), value, RateSource::Fallback)?;
                self.cache.set_rate(&rate).await;
                info!(from = %from, to = %to, rate = value, "Resolved from fallback table");
                self.events.emit(RateEvent::new(
                    RateEventKind::FallbackUsed,
                    json!({ "from": from, "to": to, "rate": value }),
                ));
                return Ok(rate);
            }
        }

        Err(match last_error {
            Some(err) => FxError::conversion_failed(from.as_str(), to.as_str())
                .with_detail("cause", err.to_string()),
            None => FxError::conversion_failed(from.as_str(), to.as_str()),
        })
    }

    /// 업스트림에서 단일 쌍을 조회합니다.
    ///
    /// 제공자가 없으면 `None`, 쿼터 소진이나 조회 실패는 `Some(Err)`.
    /// 쿼터가 소진된 경우 업스트림은 아예 시도하지 않습니다.
    async fn fetch_realtime(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> Option<FxResult<ExchangeRate>> {
        let provider = self.provider.as_ref()?;

        if let Err(err) = self.quota.can_use_api().await {
            warn!(from = %from, to = %to, "API quota exhausted, skipping upstream");
            return Some(Err(err));
        }

        let result = self
            .breaker
            .execute(|| {
                self.retry.execute(|| {
                    let provider = provider.clone();
                    let from = from.clone();
                    let to = to.clone();
                    async move { provider.fetch_rate(&from, &to).await }
                })
            })
            .await;

        match result {
            Ok(rate) => {
                self.quota.record_call().await;
                self.cache.set_rate(&rate).await;
                info!(from = %from, to = %to, rate = rate.rate, "Resolved from upstream");
                self.events.emit(RateEvent::new(
                    RateEventKind::RateUpdated,
                    json!({ "from": from, "to": to, "rate": rate.rate }),
                ));
                Some(Ok(rate))
            }
            Err(err) => {
                warn!(from = %from, to = %to, error = %err, "Upstream resolution failed");
                self.events.emit(RateEvent::new(
                    RateEventKind::ApiError,
                    json!({ "from": from, "to": to, "code": err.code(), "message": err.message() }),
                ));
                Some(Err(err))
            }
        }
    }

    /// 금액을 환전합니다.
    ///
    /// 금액은 유한한 음이 아닌 수여야 합니다. 환전 결과는 매번 다시
    /// 계산되며 캐시되지 않습니다 (기반 환율만 캐시됨).
    pub async fn convert_amount(
        &self,
        amount: f64,
        from: &CurrencyCode,
        to: &CurrencyCode,
        options: &ResolveOptions,
    ) -> FxResult<CurrencyConversion> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(FxError::invalid_amount(amount));
        }

        let rate = self.resolve_rate(from, to, options).await?;
        Ok(CurrencyConversion::apply(amount, rate))
    }

    /// 한 금액을 여러 대상 통화로 동시에 환전합니다.
    ///
    /// 결과는 대상 통화를 키로 하는 맵입니다. 실패한 대상은 경고만
    /// 남기고 맵에서 빠집니다. 형제 환전은 취소되지 않으며, 부분
    /// 성공이 정상 결과입니다.
    pub async fn convert_to_multiple(
        &self,
        amount: f64,
        from: &CurrencyCode,
        targets: &[CurrencyCode],
        options: &ResolveOptions,
    ) -> FxResult<HashMap<CurrencyCode, CurrencyConversion>> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(FxError::invalid_amount(amount));
        }

        let conversions = join_all(
            targets
                .iter()
                .map(|to| self.convert_amount(amount, from, to, options)),
        )
        .await;

        let mut results = HashMap::with_capacity(targets.len());
        for (target, outcome) in targets.iter().zip(conversions) {
            match outcome {
                Ok(conversion) => {
                    results.insert(target.clone(), conversion);
                }
                Err(err) => {
                    warn!(from = %from, to = %target, error = %err, "Skipping failed conversion target");
                }
            }
        }
        Ok(results)
    }

    /// 기준 통화 하나에 대한 여러 환율을 해석합니다.
    ///
    /// 캐시로 전부 채워지면 업스트림을 건드리지 않습니다. 비는 쌍이
    /// 있으면 bulk 업스트림 호출 한 번으로 채우고, bulk가 실패하면
    /// 쌍별 해석으로 강등합니다 (부분 결과 허용).
    pub async fn resolve_bulk(
        &self,
        base: &CurrencyCode,
        targets: &[CurrencyCode],
        options: &ResolveOptions,
    ) -> FxResult<HashMap<CurrencyCode, ExchangeRate>> {
        let mut resolved = HashMap::with_capacity(targets.len());
        let mut missing: Vec<CurrencyCode> = Vec::new();

        if !options.force_refresh
            && matches!(options.strategy, Strategy::Cached | Strategy::Hybrid)
        {
            let max_age = options.max_age.unwrap_or_else(|| self.cache.default_ttl());
            for target in targets {
                if target == base {
                    resolved.insert(target.clone(), ExchangeRate::identity(base.clone()));
                    continue;
                }
                match self.cache.get_rate(base, target).await {
                    Some(rate) if rate.age(Utc::now()) <= max_age => {
                        resolved.insert(target.clone(), rate);
                    }
                    _ => missing.push(target.clone()),
                }
            }
        } else {
            missing = targets.to_vec();
        }

        if missing.is_empty() {
            return Ok(resolved);
        }

        // bulk 업스트림 호출 시도
        if matches!(options.strategy, Strategy::Realtime | Strategy::Hybrid) {
            if let Some(rates) = self.fetch_bulk_realtime(base, &missing).await {
                let valid_until = Utc::now() + self.cache.default_ttl();
                for target in &missing {
                    if let Some(value) = rates.get(target) {
                        if let Ok(rate) = ExchangeRate::new(
                            base.clone(),
                            target.clone(),
                            *value,
                            RateSource::Upstream,
                        ) {
                            resolved.insert(target.clone(), rate.with_valid_until(valid_until));
                        }
                    }
                }
                missing.retain(|t| !resolved.contains_key(t));
            }
        }

        // 남은 쌍은 개별 해석으로 강등 (실패는 건너뜀)
        for target in missing {
            match self.resolve_rate(base, &target, options).await {
                Ok(rate) => {
                    resolved.insert(target, rate);
                }
                Err(err) => {
                    warn!(base = %base, target = %target, error = %err, "Bulk resolution target failed");
                }
            }
        }

        Ok(resolved)
    }

    /// bulk 업스트림 호출. 제공자 없음/쿼터 소진/실패는 전부 `None`.
    async fn fetch_bulk_realtime(
        &self,
        base: &CurrencyCode,
        symbols: &[CurrencyCode],
    ) -> Option<HashMap<CurrencyCode, f64>> {
        let provider = self.provider.as_ref()?;

        if self.quota.can_use_api().await.is_err() {
            warn!(base = %base, "API quota exhausted, skipping bulk upstream");
            return None;
        }

        let result = self
            .breaker
            .execute(|| {
                self.retry.execute(|| {
                    let provider = provider.clone();
                    let base = base.clone();
                    let symbols = symbols.to_vec();
                    async move { provider.fetch_rates(&base, &symbols).await }
                })
            })
            .await;

        match result {
            Ok(rates) => {
                self.quota.record_call().await;
                self.cache
                    .set_bulk(base, &rates, RateSource::Upstream)
                    .await;
                info!(base = %base, count = rates.len(), "Resolved bulk rates from upstream");
                self.events.emit(RateEvent::new(
                    RateEventKind::RateUpdated,
                    json!({ "base": base, "count": rates.len() }),
                ));
                Some(rates)
            }
            Err(err) => {
                warn!(base = %base, error = %err, "Bulk upstream resolution failed");
                self.events.emit(RateEvent::new(
                    RateEventKind::ApiError,
                    json!({ "base": base, "code": err.code(), "message": err.message() }),
                ));
                None
            }
        }
    }

    /// 캐시 전체를 비웁니다.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        self.events
            .emit(RateEvent::new(RateEventKind::CacheCleared, json!({})));
    }

    /// 현재 월간 쿼터 스냅샷.
    pub async fn api_quota(&self) -> ApiQuota {
        self.quota.status().await
    }

    /// 캐시 통계.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Circuit breaker 메트릭.
    pub fn breaker_metrics(&self) -> crate::circuit_breaker::CircuitBreakerMetrics {
        self.breaker.metrics()
    }

    /// 이벤트 리스너를 등록합니다.
    pub fn subscribe<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&RateEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    /// 이벤트 리스너를 해지합니다.
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.events.unsubscribe(handle)
    }
}

impl Drop for RateResolver {
    fn drop(&mut self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ResolveOptions::default();
        assert_eq!(options.strategy, Strategy::Hybrid);
        assert!(options.max_age.is_none());
        assert!(!options.force_refresh);
        assert!(options.fallback_on_error);
    }

    #[test]
    fn test_strategy_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&Strategy::Realtime).unwrap(),
            "\"realtime\""
        );
        let parsed: Strategy = serde_json::from_str("\"hybrid\"").unwrap();
        assert_eq!(parsed, Strategy::Hybrid);
    }
}
