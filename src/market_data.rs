// src/market_data.rs
use crate::config::UpstreamConfig;
use crate::error::{AppError, Result};
use crate::signals::PricePoint;
use crate::throttle::ThrottleHandle;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

/// `GET /coins/{id}/market_chart` body. Only `prices` is used.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinGeckoMarketChart {
    /// `[timestamp_ms, price]` pairs.
    pub prices: Vec<(f64, f64)>,
}

impl CoinGeckoMarketChart {
    pub fn into_price_points(self) -> Result<Vec<PricePoint>> {
        let points = self
            .prices
            .into_iter()
            .map(|(ts, price)| {
                if !ts.is_finite() || ts < 0.0 {
                    return Err(AppError::Validation(format!(
                        "invalid CoinGecko timestamp {}",
                        ts
                    )));
                }
                Ok(PricePoint {
                    ts: ts as i64,
                    price,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        validate_series(points)
    }
}

/// One row of `GET /api/v3/klines`, in Binance's positional layout.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceKline(
    pub i64,    // open time
    pub String, // open
    pub String, // high
    pub String, // low
    pub String, // close
    pub String, // volume
    pub i64,    // close time
    pub String, // quote asset volume
    pub u64,    // number of trades
    pub String, // taker buy base volume
    pub String, // taker buy quote volume
    pub String, // ignore
);

impl BinanceKline {
    pub fn close_time(&self) -> i64 {
        self.6
    }

    pub fn close(&self) -> Result<f64> {
        self.4
            .parse::<f64>()
            .map_err(|e| AppError::Validation(format!("bad kline close {:?}: {}", self.4, e)))
    }

    pub fn to_price_point(&self) -> Result<PricePoint> {
        Ok(PricePoint {
            ts: self.close_time(),
            price: self.close()?,
        })
    }
}

pub fn klines_to_price_points(klines: &[BinanceKline]) -> Result<Vec<PricePoint>> {
    let points = klines
        .iter()
        .map(BinanceKline::to_price_point)
        .collect::<Result<Vec<_>>>()?;
    validate_series(points)
}

/// Reject anything the indicator engine cannot use: non-finite or
/// non-positive prices and timestamps that are not strictly increasing.
pub fn validate_series(points: Vec<PricePoint>) -> Result<Vec<PricePoint>> {
    for (i, p) in points.iter().enumerate() {
        if !p.price.is_finite() || p.price <= 0.0 {
            return Err(AppError::Validation(format!(
                "price {} at index {} is not a positive number",
                p.price, i
            )));
        }
        if i > 0 && p.ts <= points[i - 1].ts {
            return Err(AppError::Validation(format!(
                "timestamps not ascending at index {} ({} after {})",
                i,
                p.ts,
                points[i - 1].ts
            )));
        }
    }
    Ok(points)
}

/// Builds upstream URLs and fetches price history through the throttle.
#[derive(Clone)]
pub struct PriceHistoryClient {
    throttle: ThrottleHandle,
    upstream: UpstreamConfig,
}

impl PriceHistoryClient {
    pub fn new(throttle: ThrottleHandle, upstream: UpstreamConfig) -> Self {
        Self { throttle, upstream }
    }

    pub fn coingecko_url(&self, coin_id: &str, days: u32) -> String {
        format!(
            "{}/coins/{}/market_chart?vs_currency=usd&days={}",
            self.upstream.coingecko_base_url.trim_end_matches('/'),
            coin_id,
            days
        )
    }

    pub fn binance_url(&self, symbol: &str, interval: &str, limit: u32) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.upstream.binance_base_url.trim_end_matches('/'),
            symbol.to_uppercase(),
            interval,
            limit
        )
    }

    #[instrument(skip(self))]
    pub async fn coingecko_history(&self, coin_id: &str, days: u32) -> Result<Vec<PricePoint>> {
        let url = self.coingecko_url(coin_id, days);
        let body = self.throttle.request(&url).await?;
        let points = parse_market_chart(body)?;
        debug!("Parsed {} CoinGecko prices for {}", points.len(), coin_id);
        Ok(points)
    }

    #[instrument(skip(self))]
    pub async fn binance_history(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<PricePoint>> {
        let url = self.binance_url(symbol, interval, limit);
        let body = self.throttle.request(&url).await?;
        let points = parse_klines(body)?;
        debug!("Parsed {} Binance klines for {}", points.len(), symbol);
        Ok(points)
    }
}

pub fn parse_market_chart(body: Value) -> Result<Vec<PricePoint>> {
    let chart: CoinGeckoMarketChart = serde_json::from_value(body)?;
    chart.into_price_points()
}

pub fn parse_klines(body: Value) -> Result<Vec<PricePoint>> {
    let klines: Vec<BinanceKline> = serde_json::from_value(body)?;
    klines_to_price_points(&klines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::{Fetcher, RawResponse, Throttle, ThrottleSettings};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    fn kline(open_time: i64, close: &str) -> Value {
        json!([
            open_time,
            "100.0",
            "110.0",
            "95.0",
            close,
            "12.5",
            open_time + 3_599_999,
            "1250.0",
            42,
            "6.0",
            "600.0",
            "0"
        ])
    }

    #[test]
    fn market_chart_becomes_price_points() {
        let body = json!({
            "prices": [[1700000000000u64, 37000.5], [1700003600000u64, 37100.25]],
            "market_caps": [[1700000000000u64, 1.0]],
            "total_volumes": [[1700000000000u64, 2.0]]
        });
        let points = parse_market_chart(body).unwrap();
        assert_eq!(
            points,
            vec![
                PricePoint {
                    ts: 1_700_000_000_000,
                    price: 37000.5
                },
                PricePoint {
                    ts: 1_700_003_600_000,
                    price: 37100.25
                },
            ]
        );
    }

    #[test]
    fn market_chart_without_prices_is_rejected() {
        let err = parse_market_chart(json!({"error": "coin not found"})).unwrap_err();
        assert!(matches!(err, AppError::Serialization(_)));
    }

    #[test]
    fn negative_prices_are_rejected() {
        let body = json!({"prices": [[1.0, 10.0], [2.0, -1.0]]});
        let err = parse_market_chart(body).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn klines_use_close_price_and_close_time() {
        let body = json!([kline(1_700_000_000_000, "101.5"), kline(1_700_003_600_000, "102.0")]);
        let points = parse_klines(body).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].price, 101.5);
        assert_eq!(points[0].ts, 1_700_003_599_999);
    }

    #[test]
    fn unparsable_close_is_rejected() {
        let body = json!([kline(1_700_000_000_000, "n/a")]);
        assert!(matches!(
            parse_klines(body).unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[test]
    fn short_kline_rows_are_rejected() {
        let body = json!([[1700000000000u64, "1", "2", "3", "4"]]);
        assert!(matches!(
            parse_klines(body).unwrap_err(),
            AppError::Serialization(_)
        ));
    }

    #[test]
    fn out_of_order_timestamps_are_rejected() {
        let points = vec![
            PricePoint { ts: 2, price: 1.0 },
            PricePoint { ts: 1, price: 1.0 },
        ];
        assert!(validate_series(points).is_err());
    }

    struct FixedBody(&'static str);

    #[async_trait]
    impl Fetcher for FixedBody {
        async fn fetch(&self, _url: &str) -> Result<RawResponse> {
            Ok(RawResponse::new(200, self.0))
        }
    }

    fn client(throttle: &Throttle) -> PriceHistoryClient {
        PriceHistoryClient::new(
            throttle.handle(),
            UpstreamConfig {
                coingecko_base_url: "https://api.coingecko.com/api/v3/".into(),
                binance_base_url: "https://api.binance.com".into(),
                user_agent: "test".into(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn urls_follow_upstream_layout() {
        let throttle = Throttle::start(Arc::new(FixedBody("{}")), ThrottleSettings::default());
        let client = client(&throttle);
        assert_eq!(
            client.coingecko_url("bitcoin", 30),
            "https://api.coingecko.com/api/v3/coins/bitcoin/market_chart?vs_currency=usd&days=30"
        );
        assert_eq!(
            client.binance_url("btcusdt", "1h", 100),
            "https://api.binance.com/api/v3/klines?symbol=BTCUSDT&interval=1h&limit=100"
        );
        throttle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn coingecko_history_goes_through_the_throttle() {
        let body = r#"{"prices":[[1700000000000,37000.5],[1700003600000,37100.25]]}"#;
        let throttle = Throttle::start(Arc::new(FixedBody(body)), ThrottleSettings::default());
        let client = client(&throttle);

        let points = client.coingecko_history("bitcoin", 1).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(throttle.handle().cache_stats().size, 1);
        throttle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_payload_shape_surfaces_as_error() {
        // a market chart body where klines are expected
        let body = r#"{"prices":[[1700000000000,37000.5]]}"#;
        let throttle = Throttle::start(Arc::new(FixedBody(body)), ThrottleSettings::default());
        let client = client(&throttle);

        let err = client.binance_history("BTCUSDT", "1h", 10).await.unwrap_err();
        assert!(matches!(err, AppError::Serialization(_)));
        throttle.stop().await;
    }
}
