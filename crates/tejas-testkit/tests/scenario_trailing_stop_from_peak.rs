//! Entry at 100.00, price path 100 -> 120 -> 140 -> 180 -> 160, driven
//! through the real `VirtualExecutor::monitor_positions` tick (peak
//! tracking happens there, not inside the strategy). Profit target is set
//! far above the 60% the final price would otherwise clear, isolating the
//! trailing-stop-from-peak path: drawdown from the 180 peak at 160 is
//! -11.1%, past the configured 10% stop.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tejas_config::ScalpingStrategyConfig;
use tejas_execution::{ExecutorConfig, VirtualExecutor};
use tejas_schemas::{ExitReasonCategory, TradingMode};
use tejas_store::Store;
use tejas_strategy::{Signal, SignalAction, Strategy, SupertrendReversalStrategy};
use tejas_testkit::{FakeStore, StaticResolver};

fn strategy_config() -> ScalpingStrategyConfig {
    ScalpingStrategyConfig {
        target_profit_percent: dec!(1.0),
        stop_loss_percent: dec!(0.1),
        time_stop_minutes: 120,
        signal_cooldown_seconds: 60,
        atr_period: 3,
        atr_multiplier: dec!(1),
    }
}

#[tokio::test]
async fn drawdown_from_peak_triggers_stop_loss_not_entry_price() {
    let store = Arc::new(FakeStore::default());
    let executor = VirtualExecutor::new(
        ExecutorConfig {
            mode: TradingMode::Paper,
            max_positions: 5,
            max_position_size: dec!(100000),
            slippage_bps: 0,
            fee_per_order: Decimal::ZERO,
        },
        store.clone() as Arc<dyn Store>,
        dec!(200000),
    );
    let strategy: Box<dyn Strategy> = Box::new(SupertrendReversalStrategy::new(
        "supertrend",
        strategy_config(),
        Arc::new(StaticResolver::default()),
        50,
        75,
    ));

    let entry_time = Utc::now() - ChronoDuration::seconds(30);
    let buy = Signal {
        action: SignalAction::BuyCall,
        symbol: "NIFTY25050CE".to_string(),
        quantity: 75,
        metadata: serde_json::json!({"trigger": "supertrend_bullish_flip"}),
    };
    executor
        .place_order(&buy, "supertrend", dec!(100.00), entry_time)
        .await
        .expect("BUY should succeed");

    for price in [dec!(120), dec!(140), dec!(180)] {
        let mut quotes = HashMap::new();
        quotes.insert("NIFTY25050CE".to_string(), price);
        let closed = executor
            .monitor_positions("supertrend", strategy.as_ref(), &quotes, Utc::now())
            .await;
        assert!(closed.is_empty(), "price {price} must not close the position yet");
    }
    assert_eq!(executor.open_position_count().await, 1);

    let mut quotes = HashMap::new();
    quotes.insert("NIFTY25050CE".to_string(), dec!(160));
    let closed = executor
        .monitor_positions("supertrend", strategy.as_ref(), &quotes, Utc::now())
        .await;
    assert_eq!(closed.len(), 1, "drawdown from the 180 peak must close the position");
    assert_eq!(executor.open_position_count().await, 0);

    let trades = store.trades.lock().unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].pnl, dec!(4500));

    let positions = store.positions.lock().unwrap();
    let closed_position = positions.values().next().expect("one position row");
    assert_eq!(
        closed_position.exit_reason_category,
        Some(ExitReasonCategory::StopLoss)
    );
}
