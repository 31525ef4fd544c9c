// src/tests.rs
#[cfg(test)]
mod tests {
    use crate::indicators::{Crossover, calculate_ema, calculate_macd, calculate_rsi};
    use crate::signals::{PricePoint, SignalType, generate_trading_signals};
    use proptest::prelude::*;

    fn prices_strategy(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(1.0f64..1000.0, 0..max_len)
    }

    proptest! {
        #[test]
        fn ema_length_law(prices in prices_strategy(80), period in 1usize..30) {
            let out = calculate_ema(&prices, period);
            let expected = (prices.len() + 1).saturating_sub(period);
            prop_assert_eq!(out.len(), expected);
        }

        #[test]
        fn rsi_stays_within_bounds(prices in prices_strategy(120), period in 2usize..20) {
            let out = calculate_rsi(&prices, period);
            prop_assert_eq!(out.len(), prices.len().saturating_sub(period));
            for v in out {
                prop_assert!(v.is_finite());
                prop_assert!((0.0..=100.0).contains(&v), "rsi {} out of range", v);
            }
        }

        #[test]
        fn macd_histogram_and_length(prices in prices_strategy(120)) {
            let out = calculate_macd(&prices, 8, 21, 5);
            prop_assert_eq!(out.len(), (prices.len() + 2).saturating_sub(21 + 5));
            if let Some(first) = out.first() {
                prop_assert_eq!(first.crossover, Crossover::None);
            }
            for p in &out {
                prop_assert!((p.histogram - (p.macd - p.signal)).abs() < 1e-9);
            }
        }

        #[test]
        fn signal_strength_is_bounded(prices in prices_strategy(120)) {
            let points: Vec<PricePoint> = prices
                .iter()
                .enumerate()
                .map(|(i, p)| PricePoint { ts: i as i64, price: *p })
                .collect();
            for s in generate_trading_signals(&points) {
                prop_assert!((0.0..=100.0).contains(&s.strength));
                if s.signal_type == SignalType::Hold {
                    prop_assert_eq!(s.strength, 50.0);
                }
            }
        }
    }

    #[test]
    fn strictly_rising_prices_give_rsi_100() {
        let prices: Vec<f64> = (0..15).map(|i| 10.0 + i as f64 * 0.5).collect();
        let out = calculate_rsi(&prices, 14);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], 100.0);
    }

    #[test]
    fn test_macd_sequence() {
        let prices = (1..100).map(|i| i as f64).collect::<Vec<_>>();
        let values = calculate_macd(&prices, 8, 21, 5);
        // steady uptrend keeps the fast EMA above the slow one
        let last = values.last().unwrap();
        assert!(last.macd > 0.0);
    }
}
