//! ATR-banded Supertrend indicator, ported from the reference
//! implementation's `_calculate_supertrend`. Computed over a bounded
//! candle buffer; a bullish/bearish flip versus the previous closed candle
//! is the entry trigger.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tejas_schemas::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy)]
pub struct SupertrendPoint {
    pub trend: Trend,
    pub value: Decimal,
}

/// True range for candle `i` against the previous close (or its own
/// high-low range for the first candle).
fn true_range(candles: &[Candle], i: usize) -> Decimal {
    let c = &candles[i];
    let range = c.high - c.low;
    if i == 0 {
        return range;
    }
    let prev_close = candles[i - 1].close;
    let a = (c.high - prev_close).abs();
    let b = (c.low - prev_close).abs();
    range.max(a).max(b)
}

/// Wilder-style simple-average ATR over `period` true ranges ending at `i`.
fn atr_at(candles: &[Candle], i: usize, period: usize) -> Option<Decimal> {
    if i + 1 < period {
        return None;
    }
    let start = i + 1 - period;
    let sum: Decimal = (start..=i).map(|j| true_range(candles, j)).sum();
    Some(sum / Decimal::from(period as u64))
}

/// Computes the Supertrend series for `candles` given `atr_period` and
/// `multiplier`. Returns `None` entries until enough history accumulates.
pub fn compute(
    candles: &[Candle],
    atr_period: usize,
    multiplier: Decimal,
) -> Vec<Option<SupertrendPoint>> {
    let mut out = vec![None; candles.len()];
    let mut final_upper: Option<Decimal> = None;
    let mut final_lower: Option<Decimal> = None;
    let mut trend = Trend::Bullish;

    for i in 0..candles.len() {
        let Some(atr) = atr_at(candles, i, atr_period) else {
            continue;
        };
        let c = &candles[i];
        let mid = (c.high + c.low) / dec!(2);
        let basic_upper = mid + multiplier * atr;
        let basic_lower = mid - multiplier * atr;

        let prev_close = if i > 0 { candles[i - 1].close } else { c.close };

        let fu = match final_upper {
            Some(prev_fu) if basic_upper < prev_fu || prev_close > prev_fu => basic_upper,
            Some(prev_fu) => prev_fu,
            None => basic_upper,
        };
        let fl = match final_lower {
            Some(prev_fl) if basic_lower > prev_fl || prev_close < prev_fl => basic_lower,
            Some(prev_fl) => prev_fl,
            None => basic_lower,
        };

        trend = if c.close > fu {
            Trend::Bullish
        } else if c.close < fl {
            Trend::Bearish
        } else {
            trend
        };

        let value = match trend {
            Trend::Bullish => fl,
            Trend::Bearish => fu,
        };

        final_upper = Some(fu);
        final_lower = Some(fl);
        out[i] = Some(SupertrendPoint { trend, value });
    }

    out
}
