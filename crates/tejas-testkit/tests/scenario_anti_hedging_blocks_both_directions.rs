//! With one open CALL position, a genuine Supertrend trend flip in either
//! direction must emit nothing: a second bullish flip is blocked because a
//! strategy may hold at most one open position (anti-overtrading), and a
//! following bearish flip is blocked because a CALL is already open
//! (anti-hedging) — both enforced by the single `has_open_call() ||
//! has_open_put()` gate on each entry branch, exercised here through the
//! real `VirtualExecutor::open_position_snapshot` rather than a
//! hand-built snapshot.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tejas_config::{AntiHedgingScope, ScalpingStrategyConfig};
use tejas_execution::{ExecutorConfig, VirtualExecutor};
use tejas_schemas::{Candle, TradingMode};
use tejas_store::Store;
use tejas_strategy::{SignalAction, Strategy, SupertrendReversalStrategy};
use tejas_testkit::{FakeStore, StaticResolver};

fn strategy_config() -> ScalpingStrategyConfig {
    ScalpingStrategyConfig {
        target_profit_percent: dec!(0.3),
        stop_loss_percent: dec!(0.1),
        time_stop_minutes: 120,
        signal_cooldown_seconds: 0,
        atr_period: 3,
        atr_multiplier: dec!(1),
    }
}

fn leg(start: DateTime<Utc>, mut price: Decimal, step: Decimal) -> (Vec<Candle>, DateTime<Utc>) {
    let mut now = start;
    let mut candles = Vec::new();
    for _ in 0..10 {
        candles.push(Candle {
            start: now,
            end: now + ChronoDuration::minutes(1),
            open: price,
            high: price + step.abs() + dec!(1),
            low: price - step.abs() - dec!(1),
            close: price,
            volume: 10,
        });
        now += ChronoDuration::minutes(1);
        price += step;
    }
    (candles, now)
}

#[tokio::test]
async fn open_call_blocks_reentry_and_the_opposite_leg() {
    let store = Arc::new(FakeStore::default());
    let executor = Arc::new(VirtualExecutor::new(
        ExecutorConfig {
            mode: TradingMode::Paper,
            max_positions: 5,
            max_position_size: dec!(100000),
            slippage_bps: 0,
            fee_per_order: Decimal::ZERO,
        },
        store.clone() as Arc<dyn Store>,
        dec!(200000),
    ));
    let mut strategy = SupertrendReversalStrategy::new(
        "supertrend",
        strategy_config(),
        Arc::new(StaticResolver::default()),
        50,
        75,
    );

    let start = Utc::now() - ChronoDuration::hours(1);
    let (down, after_down) = leg(start, dec!(200), dec!(-5));
    let empty = executor
        .open_position_snapshot("supertrend", AntiHedgingScope::PerStrategy)
        .await;
    strategy.update_market_data(&down, after_down);
    let first = strategy.generate_signals(after_down, Some(dec!(25000)), &empty);
    assert!(first.is_empty(), "no prior trend to flip from yet");

    let (up, after_up) = leg(after_down, down.last().unwrap().close, dec!(5));
    strategy.update_market_data(&up, after_up);
    let bullish_flip = strategy.generate_signals(after_up, Some(dec!(25000)), &empty);
    assert_eq!(bullish_flip.len(), 1);
    assert_eq!(bullish_flip[0].action, SignalAction::BuyCall);

    executor
        .place_order(&bullish_flip[0], "supertrend", dec!(100.00), after_up)
        .await
        .expect("BUY_CALL should succeed with no open position yet");
    assert_eq!(executor.open_position_count().await, 1);

    let open_call_snapshot = executor
        .open_position_snapshot("supertrend", AntiHedgingScope::PerStrategy)
        .await;
    assert!(open_call_snapshot.has_open_call());

    let (down2, after_down2) = leg(after_up, up.last().unwrap().close, dec!(-5));
    strategy.update_market_data(&down2, after_down2);
    let reentry_attempt = strategy.generate_signals(after_down2, Some(dec!(25000)), &open_call_snapshot);
    assert!(
        reentry_attempt.is_empty(),
        "bullish->bearish flip with a CALL already open must emit nothing"
    );
    assert_eq!(executor.open_position_count().await, 1, "no second position opened");
}
