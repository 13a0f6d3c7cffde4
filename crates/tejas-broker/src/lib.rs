//! Broker adapter contract: a single rate-limited, retrying point of
//! contact with the brokerage. The trait is the external-collaborator
//! boundary named in the purpose statement — this crate implements the
//! contract (rate limiting, retry classification, authentication state)
//! deeply, and the wire protocol only as far as a real adapter needs to
//! exist at all.

pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod types;
pub mod zerodha;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

pub use error::BrokerError;
pub use rate_limit::RateLimiter;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use zerodha::ZerodhaBroker;

use tejas_schemas::Candle;
use types::{
    BrokerHolding, BrokerPositionRow, CandleSeries, Interval, InstrumentMaster, PlaceOrderRequest,
    Quote,
};

#[async_trait]
pub trait Broker: Send + Sync {
    fn login_url(&self) -> String;

    async fn complete_session(&mut self, request_token: &str) -> Result<String, BrokerError>;

    async fn load_instruments(&self) -> Result<InstrumentMaster, BrokerError>;

    async fn ltp(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>, BrokerError>;

    async fn quote(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, BrokerError>;

    async fn historical(
        &self,
        instrument_token: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<CandleSeries, BrokerError>;

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<String, BrokerError>;

    async fn positions(&self) -> Result<Vec<BrokerPositionRow>, BrokerError>;

    async fn holdings(&self) -> Result<Vec<BrokerHolding>, BrokerError>;

    async fn margins(&self) -> Result<Decimal, BrokerError>;

    fn is_authenticated(&self) -> bool;
}

/// A closed candle is defined by `Candle::is_closed`; this helper drops the
/// most recent (in-progress) candle from a broker response so strategies
/// never see a live candle. Used by `tejas-marketdata`, kept here because
/// it's a property of what the Broker promises to return (newest-last,
/// possibly-live-last), not of market-data aggregation policy.
pub fn drop_live_candle(mut candles: CandleSeries, now: DateTime<Utc>) -> CandleSeries {
    if let Some(last) = candles.last() {
        if !last.is_closed(now) {
            candles.pop();
        }
    }
    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn candle(end_offset_secs: i64, now: DateTime<Utc>) -> Candle {
        Candle {
            start: now - chrono::Duration::seconds(end_offset_secs + 60),
            end: now - chrono::Duration::seconds(end_offset_secs),
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: 0,
        }
    }

    #[test]
    fn drops_only_the_live_trailing_candle() {
        let now = Utc::now();
        let candles = vec![candle(120, now), candle(60, now), candle(-30, now)];
        let filtered = drop_live_candle(candles, now);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|c| c.is_closed(now)));
    }

    #[test]
    fn leaves_series_untouched_when_last_already_closed() {
        let now = Utc::now();
        let candles = vec![candle(120, now), candle(60, now)];
        let filtered = drop_live_candle(candles, now);
        assert_eq!(filtered.len(), 2);
    }
}
