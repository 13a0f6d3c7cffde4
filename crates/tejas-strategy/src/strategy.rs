//! The one reference strategy: trend-reversal Supertrend entries on
//! 1-minute candles, cooldown and anti-hedging gating on entry, and a
//! trailing-stop/profit-target/time-stop exit ladder with its own
//! exit-category mapping, configured under `strategy.scalping.*`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tejas_config::ScalpingStrategyConfig;
use tejas_schemas::{Candle, ExitReasonCategory, Position};
use tracing::info;

use crate::resolver::SymbolResolver;
use crate::supertrend::{self, Trend};
use crate::types::{ExitDecision, OpenPositionSnapshot, Signal, SignalAction, Strategy};

const CANDLE_BUFFER_CAP: usize = 50;
const MIN_HOLD: ChronoDuration = ChronoDuration::seconds(5);

pub struct SupertrendReversalStrategy {
    name: String,
    config: ScalpingStrategyConfig,
    resolver: Arc<dyn SymbolResolver>,
    atm_strike_step: i64,
    default_lot_size: i64,

    candles: VecDeque<Candle>,
    new_candle_arrived: bool,
    last_trend: Option<Trend>,
    last_signal_time: Option<DateTime<Utc>>,
}

impl SupertrendReversalStrategy {
    pub fn new(
        name: impl Into<String>,
        config: ScalpingStrategyConfig,
        resolver: Arc<dyn SymbolResolver>,
        atm_strike_step: i64,
        default_lot_size: i64,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            resolver,
            atm_strike_step,
            default_lot_size,
            candles: VecDeque::with_capacity(CANDLE_BUFFER_CAP),
            new_candle_arrived: false,
            last_trend: None,
            last_signal_time: None,
        }
    }

    fn atm_strike(&self, spot: Decimal) -> i64 {
        let step = Decimal::from(self.atm_strike_step);
        let quotient = (spot / step).round();
        (quotient * step).to_string().parse().unwrap_or(0)
    }

    fn cooldown_active(&self, now: DateTime<Utc>) -> bool {
        if self.config.signal_cooldown_seconds <= 0 {
            return false;
        }
        match self.last_signal_time {
            Some(last) => {
                (now - last).num_seconds() < self.config.signal_cooldown_seconds
            }
            None => false,
        }
    }
}

impl Strategy for SupertrendReversalStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_market_data(&mut self, candles: &[Candle], now: DateTime<Utc>) {
        let closed: Vec<&Candle> = candles.iter().filter(|c| c.is_closed(now)).collect();
        for c in closed {
            let is_new = self.candles.back().map(|last| c.end > last.end).unwrap_or(true);
            if is_new {
                self.candles.push_back(*c);
                if self.candles.len() > CANDLE_BUFFER_CAP {
                    self.candles.pop_front();
                }
                self.new_candle_arrived = true;
            }
        }
    }

    fn generate_signals(
        &mut self,
        now: DateTime<Utc>,
        spot: Option<Decimal>,
        open_positions: &OpenPositionSnapshot,
    ) -> Vec<Signal> {
        let mut signals = Vec::new();

        if !self.new_candle_arrived {
            return signals;
        }
        // Consume the flag regardless of outcome below — entries are only
        // ever attempted once per new closed candle.
        self.new_candle_arrived = false;

        let buffer: Vec<Candle> = self.candles.iter().copied().collect();
        let atr_period = self.config.atr_period.max(1) as usize;
        if buffer.len() < atr_period + 1 {
            return signals;
        }

        let series = supertrend::compute(&buffer, atr_period, self.config.atr_multiplier);
        let Some(Some(current)) = series.last() else {
            return signals;
        };

        // Trend flip is relative to the last trend this strategy observed,
        // not merely the previous candle in the buffer — the buffer can
        // contain runs of many same-trend candles between flips.
        let trend_changed = self
            .last_trend
            .map(|last| last != current.trend)
            .unwrap_or(false);
        self.last_trend = Some(current.trend);

        if !trend_changed {
            return signals;
        }

        if self.cooldown_active(now) {
            return signals;
        }

        let Some(spot) = spot else {
            return signals;
        };

        match current.trend {
            Trend::Bullish => {
                if open_positions.has_open_call() || open_positions.has_open_put() {
                    info!(strategy = %self.name, "anti-hedging: skipping BUY_CALL, position already open");
                    return signals;
                }
                let atm = self.atm_strike(spot);
                let strike = atm + self.atm_strike_step;
                if let Some(inst) = self
                    .resolver
                    .resolve(strike, tejas_schemas::OptionType::Ce)
                {
                    signals.push(Signal {
                        action: SignalAction::BuyCall,
                        symbol: inst.symbol,
                        quantity: inst.lot_size,
                        metadata: serde_json::json!({"strike": strike, "trigger": "supertrend_bullish_flip"}),
                    });
                    self.last_signal_time = Some(now);
                } else {
                    signals.push(Signal {
                        action: SignalAction::BuyCall,
                        symbol: format!("NIFTY-{strike}-CE"),
                        quantity: self.default_lot_size,
                        metadata: serde_json::json!({"strike": strike, "trigger": "supertrend_bullish_flip"}),
                    });
                    self.last_signal_time = Some(now);
                }
            }
            Trend::Bearish => {
                if open_positions.has_open_call() || open_positions.has_open_put() {
                    info!(strategy = %self.name, "anti-hedging: skipping BUY_PUT, position already open");
                    return signals;
                }
                let atm = self.atm_strike(spot);
                let strike = atm - self.atm_strike_step;
                if let Some(inst) = self
                    .resolver
                    .resolve(strike, tejas_schemas::OptionType::Pe)
                {
                    signals.push(Signal {
                        action: SignalAction::BuyPut,
                        symbol: inst.symbol,
                        quantity: inst.lot_size,
                        metadata: serde_json::json!({"strike": strike, "trigger": "supertrend_bearish_flip"}),
                    });
                    self.last_signal_time = Some(now);
                } else {
                    signals.push(Signal {
                        action: SignalAction::BuyPut,
                        symbol: format!("NIFTY-{strike}-PE"),
                        quantity: self.default_lot_size,
                        metadata: serde_json::json!({"strike": strike, "trigger": "supertrend_bearish_flip"}),
                    });
                    self.last_signal_time = Some(now);
                }
            }
        }

        signals
    }

    fn should_exit(
        &self,
        position: &Position,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> ExitDecision {
        // Never force-exit on a bug: every fallible step below is a plain
        // comparison over Decimal, which cannot produce NaN/Inf, so the
        // only "exception" path this function has is the defensive
        // zero-entry-price guard.
        if position.average_price <= Decimal::ZERO {
            return ExitDecision::hold("continue holding — calculation error");
        }

        let held_for = now.signed_duration_since(position.entry_time);
        if held_for < MIN_HOLD {
            return ExitDecision::hold("minimum hold time not elapsed");
        }

        let peak = position.peak_price.max(current_price);

        let profit_fraction = (current_price - position.average_price) / position.average_price;
        if profit_fraction >= self.config.target_profit_percent {
            return ExitDecision::exit(
                ExitReasonCategory::ProfitTarget,
                format!("profit target reached: {profit_fraction}"),
            );
        }

        let drawdown_from_peak = (current_price - peak) / peak;
        if drawdown_from_peak <= -self.config.stop_loss_percent {
            return ExitDecision::exit(
                ExitReasonCategory::StopLoss,
                format!("trailing stop triggered: {drawdown_from_peak} below peak {peak}"),
            );
        }

        let minutes_held = held_for.num_seconds() as f64 / 60.0;
        if minutes_held >= self.config.time_stop_minutes as f64 {
            return ExitDecision::exit(
                ExitReasonCategory::TimeStop,
                format!("time stop reached after {minutes_held:.1} minutes"),
            );
        }

        ExitDecision::hold("no exit condition met")
    }
}
