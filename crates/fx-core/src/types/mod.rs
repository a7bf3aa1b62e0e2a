//! 도메인 타입 정의.

pub mod currency;
pub mod rate;

pub use currency::CurrencyCode;
pub use rate::{CurrencyConversion, ExchangeRate, RateSource};
