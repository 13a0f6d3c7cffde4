//! Produces the inputs strategies need: closed-candle series, current
//! price, option-chain quotes, and the market-open check. Never
//! synthesizes data — a Broker failure surfaces as an empty sequence, not
//! stale or fabricated values.

pub mod expiry;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Asia::Kolkata;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use tejas_broker::types::{Interval, Quote};
use tejas_broker::{drop_live_candle, Broker};
use tejas_schemas::Candle;

pub use expiry::next_weekly_expiry;

pub struct MarketDataService<B: Broker> {
    broker: Arc<B>,
    underlying_token: i64,
    lookback_days: i64,
}

#[derive(Debug, Clone)]
pub struct OptionChainEntry {
    pub strike: i64,
    pub call: Option<Quote>,
    pub put: Option<Quote>,
}

impl<B: Broker> MarketDataService<B> {
    pub fn new(broker: Arc<B>, underlying_token: i64, lookback_days: i64) -> Self {
        Self {
            broker,
            underlying_token,
            lookback_days,
        }
    }

    /// Closed candles only — the Broker's most recent (in-progress) candle
    /// is dropped before strategies ever see the series. Returns an empty
    /// vec (never stale data) if the Broker call fails.
    pub async fn candles(&self, interval: Interval, now: DateTime<Utc>) -> Vec<Candle> {
        let from = now - ChronoDuration::days(self.lookback_days);
        match self
            .broker
            .historical(self.underlying_token, from, now, interval)
            .await
        {
            Ok(series) => drop_live_candle(series, now),
            Err(e) => {
                warn!(error = %e, "candle fetch failed; returning empty series");
                Vec::new()
            }
        }
    }

    /// Single-symbol LTP. Returns `None` on failure rather than a stale or
    /// zero value that a caller might mistake for a real quote.
    pub async fn current_price(&self, symbol: &str) -> Option<Decimal> {
        match self.broker.ltp(&[symbol.to_string()]).await {
            Ok(mut map) => map.remove(symbol),
            Err(e) => {
                warn!(error = %e, symbol, "ltp fetch failed");
                None
            }
        }
    }

    /// Paired CE/PE quotes for each strike, at `expiry` (or the next
    /// weekly default). Missing legs are `None`, never fabricated.
    pub async fn option_chain(
        &self,
        expiry: Option<chrono::NaiveDate>,
        strikes: &[i64],
        symbol_for_strike: impl Fn(i64, tejas_schemas::OptionType) -> String,
        now: DateTime<Utc>,
    ) -> Vec<OptionChainEntry> {
        let _expiry = expiry.unwrap_or_else(|| next_weekly_expiry(now_ist_date(now)));
        let mut call_symbols = Vec::with_capacity(strikes.len());
        let mut put_symbols = Vec::with_capacity(strikes.len());
        for &strike in strikes {
            call_symbols.push(symbol_for_strike(strike, tejas_schemas::OptionType::Ce));
            put_symbols.push(symbol_for_strike(strike, tejas_schemas::OptionType::Pe));
        }
        let mut all_symbols = call_symbols.clone();
        all_symbols.extend(put_symbols.clone());

        let quotes: HashMap<String, Quote> = match self.broker.quote(&all_symbols).await {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "option chain quote fetch failed");
                HashMap::new()
            }
        };

        strikes
            .iter()
            .zip(call_symbols.iter())
            .zip(put_symbols.iter())
            .map(|((&strike, call_sym), put_sym)| OptionChainEntry {
                strike,
                call: quotes.get(call_sym).cloned(),
                put: quotes.get(put_sym).cloned(),
            })
            .collect()
    }

    /// Two-layer market-open check: first trust a fresh broker quote
    /// timestamp, then fall back to the local IST clock.
    pub async fn is_market_open(&self, reference_symbol: &str, now: DateTime<Utc>) -> bool {
        if let Ok(quotes) = self.broker.quote(&[reference_symbol.to_string()]).await {
            if let Some(q) = quotes.get(reference_symbol) {
                if let Some(last_trade) = q.last_trade_time {
                    let age = now.signed_duration_since(last_trade);
                    if age >= ChronoDuration::zero() && age <= ChronoDuration::minutes(5) {
                        return true;
                    }
                }
            }
        }
        is_market_hours_ist(now)
    }
}

fn now_ist_date(now: DateTime<Utc>) -> chrono::NaiveDate {
    now.with_timezone(&Kolkata).date_naive()
}

/// Local-clock fallback: weekday, 09:15-15:30 IST, ±2-minute grace.
pub fn is_market_hours_ist(now: DateTime<Utc>) -> bool {
    use chrono::{Datelike, Timelike, Weekday};

    let ist = now.with_timezone(&Kolkata);
    if matches!(ist.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let minutes_since_midnight = ist.hour() * 60 + ist.minute();
    let open = 9 * 60 + 15 - 2;
    let close = 15 * 60 + 30 + 2;
    (open..=close).contains(&(minutes_since_midnight as i32))
}
