//! 환율 및 환전 결과 타입.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FxError;
use crate::types::CurrencyCode;

/// 환율의 출처.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// 실시간 업스트림 제공자
    Upstream,
    /// 정적 fallback 테이블
    Fallback,
    /// 캐시 (동일 통화 항등 환율 포함)
    Cache,
}

impl std::fmt::Display for RateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateSource::Upstream => write!(f, "upstream"),
            RateSource::Fallback => write!(f, "fallback"),
            RateSource::Cache => write!(f, "cache"),
        }
    }
}

/// 해석된 환율.
///
/// 성공적인 해석마다 새로 생성되며, 생성 후에는 불변입니다.
/// 더 신선한 해석은 기존 값을 수정하지 않고 새 값으로 대체합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// 기준 통화
    pub from: CurrencyCode,
    /// 대상 통화
    pub to: CurrencyCode,
    /// 환율 (항상 양수, `from == to`이면 항상 1)
    pub rate: f64,
    /// 해석 시각
    pub timestamp: DateTime<Utc>,
    /// 출처
    pub source: RateSource,
    /// 유효 기한 (캐시 TTL 기반, 선택)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

impl ExchangeRate {
    /// 새 환율을 생성합니다. `rate`는 양의 유한값이어야 합니다.
    pub fn new(
        from: CurrencyCode,
        to: CurrencyCode,
        rate: f64,
        source: RateSource,
    ) -> Result<Self, FxError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(FxError::internal(format!(
                "Exchange rate must be a positive finite number: {}",
                rate
            )));
        }
        Ok(Self {
            from,
            to,
            rate,
            timestamp: Utc::now(),
            source,
            valid_until: None,
        })
    }

    /// 동일 통화의 항등 환율 (rate = 1, I/O 없음).
    pub fn identity(currency: CurrencyCode) -> Self {
        Self {
            from: currency.clone(),
            to: currency,
            rate: 1.0,
            timestamp: Utc::now(),
            source: RateSource::Cache,
            valid_until: None,
        }
    }

    /// 유효 기한을 설정합니다.
    pub fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    /// 해석 시점으로부터의 경과 시간을 반환합니다.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

/// 환전 결과.
///
/// `amount * rate`로 매번 다시 계산되는 일회성 값이며,
/// 결과 자체는 캐시되지 않습니다 (기반 환율만 캐시됨).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyConversion {
    /// 원래 금액
    pub amount: f64,
    /// 원래 통화
    pub from_currency: CurrencyCode,
    /// 대상 통화
    pub to_currency: CurrencyCode,
    /// 환전된 금액
    pub converted_amount: f64,
    /// 적용된 환율
    pub exchange_rate: ExchangeRate,
    /// 계산 시각
    pub timestamp: DateTime<Utc>,
}

impl CurrencyConversion {
    /// 환율을 금액에 적용해 환전 결과를 만듭니다.
    pub fn apply(amount: f64, rate: ExchangeRate) -> Self {
        Self {
            amount,
            from_currency: rate.from.clone(),
            to_currency: rate.to.clone(),
            converted_amount: amount * rate.rate,
            timestamp: Utc::now(),
            exchange_rate: rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ccy(s: &str) -> CurrencyCode {
        CurrencyCode::new(s).unwrap()
    }

    #[test]
    fn test_rate_rejects_non_positive_values() {
        assert!(ExchangeRate::new(ccy("USD"), ccy("NGN"), 0.0, RateSource::Upstream).is_err());
        assert!(ExchangeRate::new(ccy("USD"), ccy("NGN"), -1.5, RateSource::Upstream).is_err());
        assert!(
            ExchangeRate::new(ccy("USD"), ccy("NGN"), f64::INFINITY, RateSource::Upstream)
                .is_err()
        );
        assert!(ExchangeRate::new(ccy("USD"), ccy("NGN"), f64::NAN, RateSource::Upstream).is_err());
    }

    #[test]
    fn test_identity_rate_is_one() {
        let rate = ExchangeRate::identity(ccy("EUR"));
        assert_eq!(rate.rate, 1.0);
        assert_eq!(rate.from, rate.to);
        assert_eq!(rate.source, RateSource::Cache);
    }

    #[test]
    fn test_conversion_multiplies_amount() {
        let rate = ExchangeRate::new(ccy("CAD"), ccy("NGN"), 1050.0, RateSource::Fallback).unwrap();
        let conversion = CurrencyConversion::apply(35_000.0, rate);
        assert_eq!(conversion.converted_amount, 36_750_000.0);
        assert_eq!(conversion.from_currency.as_str(), "CAD");
        assert_eq!(conversion.to_currency.as_str(), "NGN");
    }

    #[test]
    fn test_rate_serde_uses_snake_case_source() {
        let rate = ExchangeRate::new(ccy("USD"), ccy("NGN"), 1500.0, RateSource::Fallback).unwrap();
        let json = serde_json::to_string(&rate).unwrap();
        assert!(json.contains("\"source\":\"fallback\""));
    }
}
