//! 업스트림 환율 제공자 클라이언트.
//!
//! 실시간 환율 조회는 `RateProvider` trait 뒤에 있습니다. 운영 구현은
//! fixer.io 스타일 HTTP API를 호출하는 `HttpRateProvider`이고, 테스트는
//! trait을 직접 구현한 double을 씁니다.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use fx_core::{CurrencyCode, ExchangeRate, FxError, FxResult, RateSource, ResolverConfig};

/// 실시간 환율 제공자.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// 제공자 이름 (로깅/에러 컨텍스트용).
    fn name(&self) -> &str;

    /// 단일 통화쌍 환율을 조회합니다.
    async fn fetch_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> FxResult<ExchangeRate>;

    /// 기준 통화 하나에 대한 여러 대상 통화 환율을 한 번에 조회합니다.
    async fn fetch_rates(
        &self,
        base: &CurrencyCode,
        symbols: &[CurrencyCode],
    ) -> FxResult<HashMap<CurrencyCode, f64>>;
}

/// fixer.io 스타일 HTTP 환율 제공자.
pub struct HttpRateProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

/// fixer.io `/latest` 응답.
#[derive(Debug, Deserialize)]
struct LatestResponse {
    success: bool,
    #[serde(default)]
    rates: Option<HashMap<String, f64>>,
    #[serde(default)]
    error: Option<ApiError>,
}

/// fixer.io 에러 페이로드.
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u32,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    info: Option<String>,
}

/// 월간 요청 한도 초과를 뜻하는 fixer 에러 코드.
const API_ERROR_USAGE_LIMIT: u32 = 104;

impl HttpRateProvider {
    /// 새 HTTP 제공자를 생성합니다. API 키가 설정에 없으면 실패합니다.
    pub fn new(config: &ResolverConfig) -> FxResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| FxError::internal("Upstream API key is not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| FxError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// `/latest`를 호출해 환율 맵을 받아옵니다.
    async fn request_latest(
        &self,
        base: &CurrencyCode,
        symbols: &[CurrencyCode],
    ) -> FxResult<HashMap<String, f64>> {
        let symbols_param = symbols
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/latest", self.base_url);

        debug!(base = %base, symbols = %symbols_param, "Fetching upstream rates");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("access_key", self.api_key.expose_secret()),
                ("base", base.as_str()),
                ("symbols", symbols_param.as_str()),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let reset_time = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<i64>().ok())
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
            return Err(FxError::rate_limit_exceeded(self.name(), reset_time));
        }

        if !response.status().is_success() {
            return Err(FxError::upstream_unavailable(format!(
                "Provider returned HTTP {}",
                response.status()
            )));
        }

        let body: LatestResponse = response.json().await.map_err(|e| {
            FxError::upstream_unavailable(format!("Malformed provider response: {}", e))
        })?;

        if !body.success {
            return Err(Self::map_api_error(self.name(), body.error));
        }

        body.rates.ok_or_else(|| {
            FxError::upstream_unavailable("Provider response missing rates field")
        })
    }

    /// success=false 응답의 에러 페이로드를 에러 분류에 맞춥니다.
    fn map_api_error(provider: &str, error: Option<ApiError>) -> FxError {
        match error {
            Some(e) if e.code == API_ERROR_USAGE_LIMIT => {
                FxError::rate_limit_exceeded(provider, None)
            }
            Some(e) => {
                warn!(
                    code = e.code,
                    error_type = e.error_type.as_deref().unwrap_or("unknown"),
                    "Upstream provider error"
                );
                FxError::upstream_unavailable(format!(
                    "Provider error {}: {}",
                    e.code,
                    e.info.or(e.error_type).unwrap_or_else(|| "unknown".into())
                ))
            }
            None => FxError::upstream_unavailable("Provider reported failure without detail"),
        }
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &str {
        "fixer"
    }

    async fn fetch_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> FxResult<ExchangeRate> {
        let rates = self.request_latest(from, std::slice::from_ref(to)).await?;

        let rate = rates.get(to.as_str()).copied().ok_or_else(|| {
            FxError::upstream_unavailable(format!("Provider response missing symbol {}", to))
        })?;

        ExchangeRate::new(from.clone(), to.clone(), rate, RateSource::Upstream)
    }

    async fn fetch_rates(
        &self,
        base: &CurrencyCode,
        symbols: &[CurrencyCode],
    ) -> FxResult<HashMap<CurrencyCode, f64>> {
        let raw = self.request_latest(base, symbols).await?;

        let mut rates = HashMap::with_capacity(raw.len());
        for (code, rate) in raw {
            match CurrencyCode::new(&code) {
                Ok(currency) if rate.is_finite() && rate > 0.0 => {
                    rates.insert(currency, rate);
                }
                _ => {
                    // 제공자가 보낸 쓰레기 항목은 건너뜀
                    warn!(code = %code, rate, "Skipping invalid rate entry from provider");
                }
            }
        }
        Ok(rates)
    }
}
