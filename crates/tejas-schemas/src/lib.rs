//! Shared domain types for the trading engine: instruments, candles, orders,
//! positions, trades, and the daily P&L aggregate. Every money/price field is
//! a `Decimal`, never `f64` — capital must be conserved to the rupee under
//! repeated add/subtract.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const STRIKE_STEP: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Ce,
    Pe,
}

impl OptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            OptionType::Ce => "CE",
            OptionType::Pe => "PE",
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TradingMode::Paper => "PAPER",
            TradingMode::Live => "LIVE",
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradingMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PAPER" => Ok(TradingMode::Paper),
            "LIVE" => Ok(TradingMode::Live),
            other => Err(format!("unrecognized trading mode: {other}")),
        }
    }
}

/// Closed set of exit-reason categories. `should_exit` only ever produces
/// ProfitTarget, StopLoss, TimeStop, MinHoldTime, or Error; ForceExit and
/// Manual are stamped by the orchestrator's sweep and manual-close paths,
/// never by the strategy itself. TrendReversal and Other are reserved for
/// future strategies whose exit rule differs from the reference strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReasonCategory {
    ProfitTarget,
    StopLoss,
    TimeStop,
    TrendReversal,
    ForceExit,
    Manual,
    MinHoldTime,
    Error,
    Other,
}

impl ExitReasonCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReasonCategory::ProfitTarget => "PROFIT_TARGET",
            ExitReasonCategory::StopLoss => "STOP_LOSS",
            ExitReasonCategory::TimeStop => "TIME_STOP",
            ExitReasonCategory::TrendReversal => "TREND_REVERSAL",
            ExitReasonCategory::ForceExit => "FORCE_EXIT",
            ExitReasonCategory::Manual => "MANUAL",
            ExitReasonCategory::MinHoldTime => "MIN_HOLD_TIME",
            ExitReasonCategory::Error => "ERROR",
            ExitReasonCategory::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for ExitReasonCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("strike {strike} is not a positive multiple of the strike step ({step})")]
pub struct InvalidStrike {
    pub strike: i64,
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: i64,
    pub option_type: OptionType,
    pub tradable_symbol: String,
    pub instrument_token: i64,
    pub lot_size: i64,
}

impl Instrument {
    pub fn new(
        underlying: impl Into<String>,
        expiry: NaiveDate,
        strike: i64,
        option_type: OptionType,
        tradable_symbol: impl Into<String>,
        instrument_token: i64,
        lot_size: i64,
    ) -> Result<Self, InvalidStrike> {
        if strike <= 0 || strike % STRIKE_STEP != 0 {
            return Err(InvalidStrike {
                strike,
                step: STRIKE_STEP,
            });
        }
        Ok(Self {
            underlying: underlying.into(),
            expiry,
            strike,
            option_type,
            tradable_symbol: tradable_symbol.into(),
            instrument_token,
            lot_size,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl Candle {
    /// A candle is closed iff its end time has already elapsed. The most
    /// recent candle a broker returns is always in-progress and must never
    /// reach a strategy.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub strategy_name: String,
    pub mode: TradingMode,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub price: Decimal,
    pub status: OrderStatus,
    pub filled_quantity: i64,
    pub filled_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
    pub signal_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub strategy_name: String,
    pub mode: TradingMode,
    pub symbol: String,
    pub option_type: OptionType,
    pub quantity: i64,
    pub original_quantity: i64,
    pub average_price: Decimal,
    pub current_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub pnl_fraction: Decimal,
    pub is_open: bool,
    pub exit_reason: Option<String>,
    pub exit_reason_category: Option<ExitReasonCategory>,
    pub entry_fees: Decimal,
    pub buy_order_id: Uuid,
    pub sell_order_id: Option<Uuid>,
    /// Peak price observed since entry; the trailing-stop anchor. Not part
    /// of the durable Store schema (it is re-derivable from tick history),
    /// so a restart that recovers an open position reseeds it to entry price
    /// (a conservative restart: a stop that had trailed up is reset, never
    /// one that had trailed down).
    pub peak_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub strategy_name: String,
    pub mode: TradingMode,
    pub symbol: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: i64,
    pub pnl: Decimal,
    pub pnl_fraction: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub hold_duration_minutes: i64,
    pub exit_reason: String,
    pub entry_signal_data: serde_json::Value,
    pub fees: Decimal,
    pub slippage: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPnl {
    pub date: NaiveDate,
    pub strategy_name: String,
    pub mode: TradingMode,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub trades_count: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub fees_paid: Decimal,
    pub portfolio_value: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_multiple_strike() {
        let err = Instrument::new(
            "NIFTY",
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            25049,
            OptionType::Ce,
            "NIFTY26JAN25049CE",
            1,
            75,
        )
        .unwrap_err();
        assert_eq!(err.strike, 25049);
    }

    #[test]
    fn accepts_valid_strike() {
        let inst = Instrument::new(
            "NIFTY",
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            25050,
            OptionType::Ce,
            "NIFTY26JAN25050CE",
            1,
            75,
        )
        .unwrap();
        assert_eq!(inst.strike, 25050);
    }

    #[test]
    fn candle_closed_boundary() {
        let now = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let c = Candle {
            start: now - chrono::Duration::minutes(1),
            end: now,
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: 0,
        };
        assert!(c.is_closed(now));
        assert!(!c.is_closed(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("paper".parse::<TradingMode>().unwrap(), TradingMode::Paper);
        assert_eq!("LIVE".parse::<TradingMode>().unwrap(), TradingMode::Live);
        assert!("bogus".parse::<TradingMode>().is_err());
    }
}
