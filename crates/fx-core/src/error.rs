//! 환율 해석 엔진의 에러 분류 체계.
//!
//! 모든 컴포넌트(캐시, 재시도, circuit breaker, resolver)가 이 타입 하나로
//! 제어 흐름을 결정합니다. 에러 생성은 kind별 팩토리 함수로만 가능하며,
//! 팩토리가 `retryable` / `fallback_available` 플래그를 고정하므로 호출부에서
//! 일관성 없는 조합을 만들 수 없습니다.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// 에러 종류 판별자.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 업스트림 환율 제공자 장애
    UpstreamUnavailable,
    /// 인식할 수 없는 통화 코드
    InvalidCurrency,
    /// 어떤 경로로도 환율을 구하지 못함
    ConversionFailed,
    /// 업스트림 요청 한도 초과
    RateLimitExceeded,
    /// 네트워크/타임아웃 오류
    NetworkError,
    /// 월간 API 호출 쿼터 소진
    QuotaExceeded,
    /// 유효하지 않은 금액
    InvalidAmount,
    /// 캐시 계층 오류
    CacheError,
    /// 내부 오류
    InternalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::InvalidCurrency => "invalid_currency",
            ErrorKind::ConversionFailed => "conversion_failed",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::CacheError => "cache_error",
            ErrorKind::InternalError => "internal_error",
        };
        write!(f, "{}", s)
    }
}

/// 환율 해석 에러.
///
/// `details`에는 구조화된 부가 정보가 들어갑니다
/// (예: `provider`, `reset_time`, `amount`).
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct FxError {
    kind: ErrorKind,
    message: String,
    code: &'static str,
    retryable: bool,
    fallback_available: bool,
    details: HashMap<String, String>,
}

/// 환율 작업을 위한 Result 타입.
pub type FxResult<T> = Result<T, FxError>;

impl FxError {
    fn new(
        kind: ErrorKind,
        code: &'static str,
        message: impl Into<String>,
        retryable: bool,
        fallback_available: bool,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            code,
            retryable,
            fallback_available,
            details: HashMap::new(),
        }
    }

    /// 업스트림 제공자 장애.
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UpstreamUnavailable,
            "UPSTREAM_UNAVAILABLE",
            message,
            true,
            true,
        )
    }

    /// 인식할 수 없는 통화 코드.
    pub fn invalid_currency(code: impl AsRef<str>) -> Self {
        let code = code.as_ref();
        Self::new(
            ErrorKind::InvalidCurrency,
            "INVALID_CURRENCY",
            format!("Unrecognized currency code: {}", code),
            false,
            false,
        )
        .with_detail("currency", code)
    }

    /// 환율을 구할 수 있는 경로가 없음.
    pub fn conversion_failed(from: impl AsRef<str>, to: impl AsRef<str>) -> Self {
        Self::new(
            ErrorKind::ConversionFailed,
            "CONVERSION_FAILED",
            format!(
                "No rate available for {} -> {}",
                from.as_ref(),
                to.as_ref()
            ),
            true,
            true,
        )
        .with_detail("from", from.as_ref())
        .with_detail("to", to.as_ref())
    }

    /// 업스트림 요청 한도 초과.
    ///
    /// `reset_time`이 주어지면 재시도 정책이 backoff 대신 해당 시각까지
    /// 대기합니다.
    pub fn rate_limit_exceeded(
        provider: impl AsRef<str>,
        reset_time: Option<DateTime<Utc>>,
    ) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimitExceeded,
            "RATE_LIMIT_EXCEEDED",
            format!("Rate limit exceeded for provider {}", provider.as_ref()),
            true,
            true,
        )
        .with_detail("provider", provider.as_ref());
        if let Some(t) = reset_time {
            err = err.with_detail("reset_time", t.to_rfc3339());
        }
        err
    }

    /// 네트워크/타임아웃 오류.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, "NETWORK_ERROR", message, true, true)
    }

    /// 월간 API 쿼터 소진.
    ///
    /// 재시도해도 소용없지만 정적 fallback 환율은 계속 사용할 수 있습니다.
    pub fn quota_exceeded(used: u32, limit: u32, reset_date: DateTime<Utc>) -> Self {
        Self::new(
            ErrorKind::QuotaExceeded,
            "QUOTA_EXCEEDED",
            format!("Monthly API quota exhausted ({}/{})", used, limit),
            false,
            true,
        )
        .with_detail("used", used.to_string())
        .with_detail("limit", limit.to_string())
        .with_detail("reset_time", reset_date.to_rfc3339())
    }

    /// 유효하지 않은 금액 (음수, NaN, 무한대).
    pub fn invalid_amount(amount: f64) -> Self {
        Self::new(
            ErrorKind::InvalidAmount,
            "INVALID_AMOUNT",
            format!("Amount must be a finite, non-negative number: {}", amount),
            false,
            false,
        )
        .with_detail("amount", amount.to_string())
    }

    /// 캐시 계층 오류.
    ///
    /// 캐시 쓰기는 best-effort이므로 이 에러가 사용자에게 전파되는 일은
    /// 없어야 합니다 (읽기 실패는 miss로 강등).
    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CacheError, "CACHE_ERROR", message, false, true)
    }

    /// 내부 오류.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InternalError,
            "INTERNAL_ERROR",
            message,
            false,
            false,
        )
    }

    /// 구조화된 부가 정보 추가.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// 에러 종류 반환.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 사람이 읽을 수 있는 메시지 반환.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 기계 판독용 에러 코드 반환.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// 정적 fallback 환율로 대체 가능한지 확인.
    pub fn has_fallback(&self) -> bool {
        self.fallback_available
    }

    /// 부가 정보 맵 반환.
    pub fn details(&self) -> &HashMap<String, String> {
        &self.details
    }

    /// `reset_time` 부가 정보를 파싱해서 반환.
    ///
    /// RateLimitExceeded / QuotaExceeded 에러가 한도 해제 시각을 실어
    /// 보낼 때 사용됩니다.
    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        self.details
            .get("reset_time")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

impl From<reqwest::Error> for FxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FxError::network(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            FxError::network(format!("Connection failed: {}", err))
        } else {
            FxError::upstream_unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FxError {
    fn from(err: serde_json::Error) -> Self {
        FxError::internal(format!("Serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factories_fix_retryable_flags() {
        assert!(FxError::network("boom").is_retryable());
        assert!(FxError::upstream_unavailable("down").is_retryable());
        assert!(FxError::rate_limit_exceeded("fixer", None).is_retryable());
        assert!(FxError::conversion_failed("USD", "NGN").is_retryable());

        assert!(!FxError::invalid_currency("XXX").is_retryable());
        assert!(!FxError::invalid_amount(-1.0).is_retryable());
        assert!(!FxError::quota_exceeded(100, 100, Utc::now()).is_retryable());
        assert!(!FxError::internal("bug").is_retryable());
    }

    #[test]
    fn test_factories_fix_fallback_flags() {
        assert!(FxError::network("boom").has_fallback());
        assert!(FxError::quota_exceeded(100, 100, Utc::now()).has_fallback());

        assert!(!FxError::invalid_currency("ZZZ").has_fallback());
        assert!(!FxError::invalid_amount(f64::NAN).has_fallback());
    }

    #[test]
    fn test_display_includes_code_and_message() {
        let err = FxError::invalid_currency("QQQ");
        let s = err.to_string();
        assert!(s.contains("INVALID_CURRENCY"));
        assert!(s.contains("QQQ"));
    }

    #[test]
    fn test_reset_time_round_trip() {
        let at = Utc::now();
        let err = FxError::rate_limit_exceeded("fixer", Some(at));
        let parsed = err.reset_time().unwrap();
        assert_eq!(parsed.timestamp(), at.timestamp());

        assert!(FxError::network("no reset").reset_time().is_none());
    }

    #[test]
    fn test_details_carry_context() {
        let err = FxError::invalid_amount(-5.0);
        assert_eq!(err.details().get("amount").unwrap(), "-5");
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
    }
}
