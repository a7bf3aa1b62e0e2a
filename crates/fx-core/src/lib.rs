//! 환율 해석 엔진의 핵심 도메인 타입.
//!
//! 이 crate는 다음을 제공합니다:
//! - 전체 컴포넌트가 공유하는 에러 분류 체계 (`FxError`)
//! - 통화 코드 및 환율 도메인 타입
//! - 애플리케이션 설정 로딩
//! - tracing 기반 로깅 초기화

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{AppConfig, LoggingConfig, RedisConfig, ResolverConfig};
pub use error::{ErrorKind, FxError, FxResult};
pub use types::{CurrencyCode, CurrencyConversion, ExchangeRate, RateSource};
