//! Two `VirtualExecutor::recover()` runs against an unchanged Store
//! produce the same in-memory position map, because a genuinely-open
//! recovered position is keyed off its Store row id rather than a
//! counter the call itself advances.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tejas_execution::{ExecutorConfig, VirtualExecutor};
use tejas_schemas::TradingMode;
use tejas_store::Store;
use tejas_testkit::{blank_open_position, FakeStore};

#[tokio::test]
async fn rerunning_recovery_on_unchanged_store_yields_the_same_map() {
    let store = Arc::new(FakeStore::default());
    let entry_time = Utc::now() - ChronoDuration::hours(2);
    let position = blank_open_position("NIFTY25050CE", dec!(100.00), entry_time);
    let position_id = position.id;
    store.seed_position(position);

    let executor = VirtualExecutor::new(
        ExecutorConfig {
            mode: TradingMode::Paper,
            max_positions: 5,
            max_position_size: dec!(100000),
            slippage_bps: 0,
            fee_per_order: rust_decimal::Decimal::ZERO,
        },
        store.clone() as Arc<dyn Store>,
        dec!(200000),
    );

    let first_report = executor.recover().await.expect("first recovery should succeed");
    assert_eq!(first_report.recovered, 1);
    assert_eq!(first_report.orphans_closed, 0);
    let first_snapshot = executor.open_positions_raw().await;
    assert_eq!(first_snapshot.len(), 1);

    let second_report = executor.recover().await.expect("second recovery should succeed");
    assert_eq!(second_report.recovered, 1);
    assert_eq!(second_report.orphans_closed, 0);
    let second_snapshot = executor.open_positions_raw().await;

    assert_eq!(first_snapshot.len(), second_snapshot.len());
    let (first_key, first_position) = &first_snapshot[0];
    let (second_key, second_position) = &second_snapshot[0];
    assert_eq!(first_key, second_key, "recovered key must be stable across runs");
    assert_eq!(first_position.id, position_id);
    assert_eq!(second_position.id, position_id);
    assert_eq!(first_position.average_price, second_position.average_price);
    assert_eq!(first_position.peak_price, second_position.peak_price);
    assert!(first_position.is_open && second_position.is_open);
}
