//! 정적 fallback 환율 테이블.
//!
//! 업스트림 제공자가 죽었거나 쿼터가 소진됐을 때 쓰는 최후의 환율
//! 테이블입니다. 빌드/설정 시점에 구성되고 런타임에는 절대 변하지 않으며,
//! 네트워크나 I/O 없이 순수 조회만 수행합니다.
//!
//! # 조회 순서 (첫 매치 반환)
//!
//! 1. `from == to` → 1
//! 2. 직접 엔트리 `table[from][to]`
//! 3. 역방향 엔트리 `table[to][from]`의 역수
//! 4. USD를 중개 통화로 한 cross rate: `rate(from,USD) * rate(USD,to)`
//!
//! cross rate의 중개 통화는 USD 하나로 고정되어 있습니다. 테이블에 더
//! 짧은 다른 경로가 있어도 USD 경로만 사용합니다 (기존 쌍의 결과가
//! 바뀌지 않도록 유지).

use std::collections::{BTreeSet, HashMap};

use fx_core::CurrencyCode;

/// cross rate 계산에 사용하는 중개 통화.
const INTERMEDIARY: &str = "USD";

/// 정적 fallback 환율 테이블.
///
/// 명시적으로 생성해서 resolver에 주입합니다 (모듈 전역 상태 없음).
#[derive(Debug, Clone)]
pub struct FallbackRateTable {
    /// base → (target → rate)
    table: HashMap<CurrencyCode, HashMap<CurrencyCode, f64>>,
    intermediary: CurrencyCode,
}

impl FallbackRateTable {
    /// 빈 테이블을 생성합니다 (테스트용).
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
            intermediary: CurrencyCode::new(INTERMEDIARY).expect("USD is a valid code"),
        }
    }

    /// 주어진 엔트리로 테이블을 생성합니다.
    ///
    /// 유효하지 않은 통화 코드나 0 이하의 환율은 건너뜁니다.
    pub fn with_rates<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S, f64)>,
        S: AsRef<str>,
    {
        let mut table: HashMap<CurrencyCode, HashMap<CurrencyCode, f64>> = HashMap::new();
        for (from, to, rate) in entries {
            let (Ok(from), Ok(to)) = (CurrencyCode::new(from), CurrencyCode::new(to)) else {
                continue;
            };
            if !rate.is_finite() || rate <= 0.0 {
                continue;
            }
            table.entry(from).or_default().insert(to, rate);
        }
        Self {
            table,
            intermediary: CurrencyCode::new(INTERMEDIARY).expect("USD is a valid code"),
        }
    }

    /// fallback 환율을 조회합니다. 경로가 없으면 `None`.
    pub fn get_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Option<f64> {
        if from == to {
            return Some(1.0);
        }

        // 직접 엔트리
        if let Some(rate) = self.table.get(from).and_then(|m| m.get(to)) {
            return Some(*rate);
        }

        // 역방향 엔트리
        if let Some(rate) = self.table.get(to).and_then(|m| m.get(from)) {
            return Some(1.0 / rate);
        }

        // USD 중개 cross rate (from/to 어느 쪽도 USD가 아닐 때만)
        if from != &self.intermediary && to != &self.intermediary {
            let leg_a = self.get_rate(from, &self.intermediary)?;
            let leg_b = self.get_rate(&self.intermediary, to)?;
            return Some(leg_a * leg_b);
        }

        None
    }

    /// 해당 쌍의 fallback 환율이 존재하는지 확인합니다.
    pub fn has_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> bool {
        self.get_rate(from, to).is_some()
    }

    /// 테이블이 아는 모든 통화를 반환합니다.
    pub fn supported_currencies(&self) -> BTreeSet<CurrencyCode> {
        let mut set = BTreeSet::new();
        for (base, targets) in &self.table {
            set.insert(base.clone());
            for target in targets.keys() {
                set.insert(target.clone());
            }
        }
        set
    }

    /// 직접 엔트리 수 (통계/로깅용).
    pub fn entry_count(&self) -> usize {
        self.table.values().map(|m| m.len()).sum()
    }
}

impl Default for FallbackRateTable {
    /// 유학 프로그램 검색에서 주로 쓰는 통화들의 기본 테이블.
    ///
    /// USD 기준 환율에 자주 쓰는 비-USD 직접 쌍을 더한 구성입니다.
    /// 직접 엔트리는 cross rate보다 항상 우선합니다.
    fn default() -> Self {
        Self::with_rates([
            // USD 기준
            ("USD", "EUR", 0.92),
            ("USD", "GBP", 0.79),
            ("USD", "CAD", 1.36),
            ("USD", "AUD", 1.52),
            ("USD", "JPY", 155.0),
            ("USD", "CNY", 7.20),
            ("USD", "KRW", 1380.0),
            ("USD", "INR", 83.5),
            ("USD", "NGN", 1500.0),
            ("USD", "GHS", 15.5),
            ("USD", "KES", 129.0),
            ("USD", "ZAR", 18.2),
            ("USD", "EGP", 48.5),
            ("USD", "XOF", 600.0),
            ("USD", "CHF", 0.88),
            ("USD", "SEK", 10.5),
            ("USD", "AED", 3.67),
            ("USD", "BRL", 5.60),
            ("USD", "MXN", 17.1),
            // 자주 쓰는 직접 쌍 (나이지리아 유학 corridor)
            ("CAD", "NGN", 1050.0),
            ("GBP", "NGN", 1900.0),
            ("EUR", "NGN", 1630.0),
            ("GBP", "CAD", 1.72),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ccy(s: &str) -> CurrencyCode {
        CurrencyCode::new(s).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn test_identity_is_one() {
        let table = FallbackRateTable::default();
        for code in table.supported_currencies() {
            assert_eq!(table.get_rate(&code, &code), Some(1.0));
        }
        // 테이블이 모르는 통화도 동일 통화면 1
        assert_eq!(table.get_rate(&ccy("QQQ"), &ccy("QQQ")), Some(1.0));
    }

    #[test]
    fn test_direct_entry() {
        let table = FallbackRateTable::default();
        assert_eq!(table.get_rate(&ccy("USD"), &ccy("NGN")), Some(1500.0));
        assert_eq!(table.get_rate(&ccy("CAD"), &ccy("NGN")), Some(1050.0));
    }

    #[test]
    fn test_inverse_entry() {
        let table = FallbackRateTable::default();
        let rate = table.get_rate(&ccy("NGN"), &ccy("USD")).unwrap();
        assert!(close(rate, 1.0 / 1500.0));
    }

    #[test]
    fn test_cross_rate_through_usd() {
        let table = FallbackRateTable::default();
        // KRW→JPY는 직접/역방향 엔트리가 없으므로 USD 경유
        let rate = table.get_rate(&ccy("KRW"), &ccy("JPY")).unwrap();
        assert!(close(rate, (1.0 / 1380.0) * 155.0));
    }

    #[test]
    fn test_direct_entry_wins_over_cross() {
        let table = FallbackRateTable::default();
        // CAD→NGN은 USD 경유 cross(~1103)가 아닌 직접 엔트리 사용
        assert_eq!(table.get_rate(&ccy("CAD"), &ccy("NGN")), Some(1050.0));
    }

    #[test]
    fn test_unknown_currency_is_none() {
        let table = FallbackRateTable::default();
        assert_eq!(table.get_rate(&ccy("USD"), &ccy("QQQ")), None);
        assert_eq!(table.get_rate(&ccy("QQQ"), &ccy("NGN")), None);
        assert!(!table.has_rate(&ccy("USD"), &ccy("QQQ")));
    }

    #[test]
    fn test_inverse_consistency_for_all_direct_pairs() {
        let table = FallbackRateTable::default();
        for from in table.supported_currencies() {
            for to in table.supported_currencies() {
                if let Some(forward) = table.table.get(&from).and_then(|m| m.get(&to)) {
                    // 양방향 직접 엔트리가 없는 한 역방향은 정확히 역수
                    if table.table.get(&to).and_then(|m| m.get(&from)).is_none() {
                        let backward = table.get_rate(&to, &from).unwrap();
                        assert!(
                            close(backward, 1.0 / forward),
                            "{}->{}: {} vs {}",
                            to,
                            from,
                            backward,
                            1.0 / forward
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_cross_rate_consistency() {
        let table = FallbackRateTable::default();
        let usd = ccy("USD");
        for from in table.supported_currencies() {
            for to in table.supported_currencies() {
                if from == to || from == usd || to == usd {
                    continue;
                }
                // 직접/역방향 엔트리가 있는 쌍은 cross 공식의 대상이 아님
                let has_direct = table.table.get(&from).map_or(false, |m| m.contains_key(&to))
                    || table.table.get(&to).map_or(false, |m| m.contains_key(&from));
                if has_direct {
                    continue;
                }
                let cross = table.get_rate(&from, &to).unwrap();
                let via_usd =
                    table.get_rate(&from, &usd).unwrap() * table.get_rate(&usd, &to).unwrap();
                assert!(close(cross, via_usd), "{}->{}", from, to);
            }
        }
    }

    #[test]
    fn test_with_rates_skips_invalid_entries() {
        let table = FallbackRateTable::with_rates([
            ("USD", "NGN", 1500.0),
            ("USD", "BAD1", 2.0), // 잘못된 코드
            ("USD", "EUR", -1.0), // 음수 환율
            ("USD", "GBP", f64::NAN),
        ]);
        assert_eq!(table.entry_count(), 1);
        assert_eq!(table.get_rate(&ccy("USD"), &ccy("NGN")), Some(1500.0));
        assert_eq!(table.get_rate(&ccy("USD"), &ccy("EUR")), None);
    }

    #[test]
    fn test_supported_currencies_includes_targets() {
        let table = FallbackRateTable::with_rates([("USD", "NGN", 1500.0)]);
        let set = table.supported_currencies();
        assert!(set.contains(&ccy("USD")));
        assert!(set.contains(&ccy("NGN")));
        assert_eq!(set.len(), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_inverse_is_reciprocal(rate in 1e-4f64..1e5) {
                let table = FallbackRateTable::with_rates([("USD", "NGN", rate)]);
                let inverse = table.get_rate(&ccy("NGN"), &ccy("USD")).unwrap();
                prop_assert!(close(inverse, 1.0 / rate));
            }

            #[test]
            fn prop_cross_rate_is_leg_product(a in 1e-4f64..1e5, b in 1e-4f64..1e5) {
                let table =
                    FallbackRateTable::with_rates([("KES", "USD", a), ("USD", "GHS", b)]);
                let cross = table.get_rate(&ccy("KES"), &ccy("GHS")).unwrap();
                prop_assert!(close(cross, a * b));
            }
        }
    }
}
