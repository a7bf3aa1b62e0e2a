//! 통화 코드 타입.
//!
//! ISO 4217 형태의 3글자 알파벳 코드를 검증하는 newtype입니다.
//! 존재하지 않는 통화를 거르는 것은 fallback 테이블/업스트림의 몫이고,
//! 여기서는 형식만 검증합니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FxError;

/// 검증된 통화 코드 (예: "USD", "NGN", "KRW").
///
/// 항상 대문자 3글자 알파벳으로 정규화됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// 문자열에서 통화 코드를 생성합니다.
    ///
    /// 3글자 ASCII 알파벳이 아니면 `InvalidCurrency`를 반환합니다.
    pub fn new(code: impl AsRef<str>) -> Result<Self, FxError> {
        let trimmed = code.as_ref().trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(FxError::invalid_currency(trimmed));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// 코드 문자열 반환.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = FxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = FxError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_currency_code_normalizes_case() {
        let code = CurrencyCode::new("ngn").unwrap();
        assert_eq!(code.as_str(), "NGN");
        assert_eq!(code.to_string(), "NGN");
    }

    #[test]
    fn test_currency_code_trims_whitespace() {
        let code = CurrencyCode::new(" usd ").unwrap();
        assert_eq!(code.as_str(), "USD");
    }

    #[test]
    fn test_currency_code_rejects_bad_input() {
        assert!(CurrencyCode::new("").is_err());
        assert!(CurrencyCode::new("US").is_err());
        assert!(CurrencyCode::new("USDT").is_err());
        assert!(CurrencyCode::new("U1D").is_err());
        assert!(CurrencyCode::new("₩₩₩").is_err());
    }

    #[test]
    fn test_currency_code_serde_round_trip() {
        let code = CurrencyCode::new("CAD").unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"CAD\"");
        let back: CurrencyCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    proptest! {
        #[test]
        fn prop_three_ascii_letters_always_parse(s in "[a-zA-Z]{3}") {
            let code = CurrencyCode::new(&s).unwrap();
            prop_assert_eq!(code.as_str(), s.to_ascii_uppercase());
        }

        #[test]
        fn prop_wrong_length_never_parses(s in "[a-zA-Z]{0,2}|[a-zA-Z]{4,8}") {
            prop_assert!(CurrencyCode::new(&s).is_err());
        }
    }
}
