pub mod config;
pub mod orchestrator;
pub mod strategy_host;

pub use config::OrchestratorConfig;
pub use orchestrator::{Orchestrator, RunState};
pub use strategy_host::StrategyHost;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use chrono_tz::Asia::Kolkata;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::Arc;
    use uuid::Uuid;

    use tejas_broker::types::{
        BrokerHolding, BrokerPositionRow, CandleSeries, Interval, InstrumentMaster,
        PlaceOrderRequest, Quote,
    };
    use tejas_broker::{Broker, BrokerError};
    use tejas_config::AntiHedgingScope;
    use tejas_execution::{ExecutorConfig, VirtualExecutor};
    use tejas_marketdata::MarketDataService;
    use tejas_schemas::{Candle, DailyPnl, Order, OrderSide, Position, Trade, TradingMode};
    use tejas_store::{PositionPatch, Store, StoreError};
    use tejas_strategy::{ExitDecision, OpenPositionSnapshot, Signal, SignalAction, Strategy};

    /// Never returns a usable quote, forcing `MarketDataService::is_market_open`
    /// onto its local-clock fallback; LTPs come from a settable price table.
    #[derive(Default)]
    struct FakeBroker {
        prices: StdMutex<HashMap<String, Decimal>>,
    }

    impl FakeBroker {
        fn set_price(&self, symbol: &str, price: Decimal) {
            self.prices.lock().unwrap().insert(symbol.to_string(), price);
        }
    }

    #[async_trait]
    impl Broker for FakeBroker {
        fn login_url(&self) -> String {
            String::new()
        }

        async fn complete_session(&mut self, _request_token: &str) -> Result<String, BrokerError> {
            Ok("token".to_string())
        }

        async fn load_instruments(&self) -> Result<InstrumentMaster, BrokerError> {
            Ok(vec![])
        }

        async fn ltp(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>, BrokerError> {
            let prices = self.prices.lock().unwrap();
            Ok(symbols
                .iter()
                .filter_map(|s| prices.get(s).map(|p| (s.clone(), *p)))
                .collect())
        }

        async fn quote(&self, _symbols: &[String]) -> Result<HashMap<String, Quote>, BrokerError> {
            Err(BrokerError::transient("no live quote feed in this fake"))
        }

        async fn historical(
            &self,
            _instrument_token: i64,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _interval: Interval,
        ) -> Result<CandleSeries, BrokerError> {
            Ok(Vec::<Candle>::new())
        }

        async fn place_order(&self, _req: PlaceOrderRequest) -> Result<String, BrokerError> {
            Ok(Uuid::new_v4().to_string())
        }

        async fn positions(&self) -> Result<Vec<BrokerPositionRow>, BrokerError> {
            Ok(vec![])
        }

        async fn holdings(&self) -> Result<Vec<BrokerHolding>, BrokerError> {
            Ok(vec![])
        }

        async fn margins(&self) -> Result<Decimal, BrokerError> {
            Ok(Decimal::ZERO)
        }

        fn is_authenticated(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct InMemoryStore {
        orders: StdMutex<Vec<Order>>,
        positions: StdMutex<HashMap<Uuid, Position>>,
        trades: StdMutex<Vec<Trade>>,
        daily_pnl: StdMutex<Vec<DailyPnl>>,
    }

    #[async_trait]
    impl Store for InMemoryStore {
        async fn save_order(&self, order: &Order) -> Result<Uuid, StoreError> {
            self.orders.lock().unwrap().push(order.clone());
            Ok(order.id)
        }

        async fn save_position(&self, position: &Position) -> Result<Uuid, StoreError> {
            self.positions
                .lock()
                .unwrap()
                .insert(position.id, position.clone());
            Ok(position.id)
        }

        async fn update_position(&self, id: Uuid, patch: PositionPatch) -> Result<(), StoreError> {
            let mut positions = self.positions.lock().unwrap();
            let p = positions.get_mut(&id).ok_or(StoreError::NotFound)?;
            if let Some(v) = patch.quantity {
                p.quantity = v;
            }
            if let Some(v) = patch.current_price {
                p.current_price = v;
            }
            if let Some(v) = patch.unrealized_pnl {
                p.unrealized_pnl = v;
            }
            if let Some(v) = patch.realized_pnl {
                p.realized_pnl = v;
            }
            if let Some(v) = patch.pnl_fraction {
                p.pnl_fraction = v;
            }
            if let Some(v) = patch.is_open {
                p.is_open = v;
            }
            if let Some(v) = patch.exit_time {
                p.exit_time = Some(v);
            }
            if let Some(v) = patch.exit_price {
                p.exit_price = Some(v);
            }
            if let Some(v) = patch.exit_reason {
                p.exit_reason = Some(v);
            }
            if let Some(v) = patch.exit_reason_category {
                p.exit_reason_category = Some(v);
            }
            if let Some(v) = patch.sell_order_id {
                p.sell_order_id = Some(v);
            }
            Ok(())
        }

        async fn get_open_positions(&self, mode: TradingMode) -> Result<Vec<Position>, StoreError> {
            Ok(self
                .positions
                .lock()
                .unwrap()
                .values()
                .filter(|p| p.is_open && p.mode == mode)
                .cloned()
                .collect())
        }

        async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError> {
            Ok(self.positions.lock().unwrap().get(&id).cloned())
        }

        async fn get_orders_by_symbol(
            &self,
            symbol: &str,
            mode: TradingMode,
        ) -> Result<Vec<Order>, StoreError> {
            Ok(self
                .orders
                .lock()
                .unwrap()
                .iter()
                .filter(|o| o.symbol == symbol && o.mode == mode)
                .cloned()
                .collect())
        }

        async fn get_orders_by_symbol_strategy_side(
            &self,
            symbol: &str,
            strategy_name: &str,
            side: OrderSide,
            mode: TradingMode,
        ) -> Result<Vec<Order>, StoreError> {
            Ok(self
                .orders
                .lock()
                .unwrap()
                .iter()
                .filter(|o| {
                    o.symbol == symbol
                        && o.strategy_name == strategy_name
                        && o.side == side
                        && o.mode == mode
                })
                .cloned()
                .collect())
        }

        async fn insert_trade(&self, trade: &Trade) -> Result<Uuid, StoreError> {
            self.trades.lock().unwrap().push(trade.clone());
            Ok(trade.id)
        }

        async fn get_trades_since(
            &self,
            strategy_name: &str,
            mode: TradingMode,
            since: DateTime<Utc>,
        ) -> Result<Vec<Trade>, StoreError> {
            Ok(self
                .trades
                .lock()
                .unwrap()
                .iter()
                .filter(|t| {
                    t.strategy_name == strategy_name && t.mode == mode && t.entry_time >= since
                })
                .cloned()
                .collect())
        }

        async fn upsert_daily_pnl(&self, row: &DailyPnl) -> Result<(), StoreError> {
            self.daily_pnl.lock().unwrap().push(row.clone());
            Ok(())
        }
    }

    /// Emits one BUY signal per tick, always for the same symbol/quantity,
    /// and never asks to exit — used to drive entry-side orchestrator logic
    /// without depending on the reference strategy's indicator math.
    struct AlwaysBuyStrategy {
        name: String,
        symbol: String,
        quantity: i64,
    }

    impl Strategy for AlwaysBuyStrategy {
        fn name(&self) -> &str {
            &self.name
        }

        fn update_market_data(&mut self, _candles: &[Candle], _now: DateTime<Utc>) {}

        fn generate_signals(
            &mut self,
            _now: DateTime<Utc>,
            _spot: Option<Decimal>,
            _open_positions: &OpenPositionSnapshot,
        ) -> Vec<Signal> {
            vec![Signal {
                action: SignalAction::BuyCall,
                symbol: self.symbol.clone(),
                quantity: self.quantity,
                metadata: serde_json::json!({}),
            }]
        }

        fn should_exit(
            &self,
            _position: &Position,
            _current_price: Decimal,
            _now: DateTime<Utc>,
        ) -> ExitDecision {
            ExitDecision::hold("never exits on its own")
        }
    }

    fn executor_config() -> ExecutorConfig {
        ExecutorConfig {
            mode: TradingMode::Paper,
            max_positions: 10,
            max_position_size: dec!(100000),
            slippage_bps: 0,
            fee_per_order: Decimal::ZERO,
        }
    }

    fn orchestrator_config(max_daily_trades: i64) -> OrchestratorConfig {
        OrchestratorConfig {
            tick_interval_seconds: 1,
            force_exit_hour: 15,
            force_exit_minute: 5,
            max_daily_trades,
            daily_pnl_persist_every_n_ticks: 1_000_000,
            reference_symbol: "NIFTY".to_string(),
        }
    }

    fn ist(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn build(
        max_daily_trades: i64,
        strategy: Option<AlwaysBuyStrategy>,
    ) -> (Orchestrator<FakeBroker>, Arc<FakeBroker>, Arc<InMemoryStore>, Arc<VirtualExecutor>) {
        let broker = Arc::new(FakeBroker::default());
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::default());
        let executor = Arc::new(VirtualExecutor::new(
            executor_config(),
            store.clone() as Arc<dyn Store>,
            dec!(200000),
        ));
        let market_data = MarketDataService::new(broker.clone(), 256265, 5);
        let mut host = StrategyHost::new();
        if let Some(s) = strategy {
            host.register(Box::new(s));
        }
        let orchestrator = Orchestrator::new(
            orchestrator_config(max_daily_trades),
            TradingMode::Paper,
            AntiHedgingScope::PerStrategy,
            market_data,
            executor.clone(),
            store.clone() as Arc<dyn Store>,
            host,
        );
        (orchestrator, broker, store, executor)
    }

    #[tokio::test]
    async fn tick_is_a_noop_outside_market_hours() {
        let (mut orchestrator, broker, _store, executor) = build(10, None);
        broker.set_price("NIFTY", dec!(100));
        // 2026-02-01 is a Sunday.
        let now = ist(2026, 2, 1, 10, 0);
        orchestrator.tick(now).await.unwrap();
        assert_eq!(executor.open_position_count().await, 0);
    }

    #[tokio::test]
    async fn daily_trade_cap_stops_entries_mid_tick_without_blocking_force_exit() {
        let strategy = AlwaysBuyStrategy {
            name: "buyer".to_string(),
            symbol: "NIFTY25050CE".to_string(),
            quantity: 75,
        };
        let (mut orchestrator, broker, _store, executor) = build(2, Some(strategy));
        broker.set_price("NIFTY", dec!(25000));
        broker.set_price("NIFTY25050CE", dec!(100));

        let midday = ist(2026, 2, 2, 12, 0);
        for _ in 0..3 {
            orchestrator.tick(midday).await.unwrap();
        }
        // cap is 2, and only one signal is produced per tick, so the third
        // tick's entry must be skipped.
        assert_eq!(executor.open_position_count().await, 2);

        // Force exit must still close everything even though the cap is
        // already exhausted for the day.
        broker.set_price("NIFTY25050CE", dec!(130));
        let past_cutoff = ist(2026, 2, 2, 15, 6);
        orchestrator.tick(past_cutoff).await.unwrap();
        assert_eq!(executor.open_position_count().await, 0);
    }

    #[tokio::test]
    async fn force_exit_sweep_closes_open_positions_at_cutoff() {
        let (mut orchestrator, broker, _store, executor) = build(10, None);
        broker.set_price("NIFTY", dec!(25000));
        broker.set_price("NIFTY25050CE", dec!(130));

        let entry_time = ist(2026, 2, 2, 10, 0);
        executor
            .place_order(
                &Signal {
                    action: SignalAction::BuyCall,
                    symbol: "NIFTY25050CE".to_string(),
                    quantity: 75,
                    metadata: serde_json::json!({}),
                },
                "manual",
                dec!(100),
                entry_time,
            )
            .await
            .expect("seed position");
        assert_eq!(executor.open_position_count().await, 1);

        let past_cutoff = ist(2026, 2, 2, 15, 6);
        orchestrator.tick(past_cutoff).await.unwrap();
        assert_eq!(executor.open_position_count().await, 0);
    }

    #[tokio::test]
    async fn new_trading_day_resets_the_daily_trade_counter() {
        let strategy = AlwaysBuyStrategy {
            name: "buyer".to_string(),
            symbol: "NIFTY25050CE".to_string(),
            quantity: 75,
        };
        let (mut orchestrator, broker, _store, executor) = build(1, Some(strategy));
        broker.set_price("NIFTY", dec!(25000));
        broker.set_price("NIFTY25050CE", dec!(100));

        let day1 = ist(2026, 2, 2, 12, 0);
        orchestrator.tick(day1).await.unwrap();
        orchestrator.tick(day1).await.unwrap();
        assert_eq!(executor.open_position_count().await, 1, "cap of 1 holds within day1");

        let day2 = ist(2026, 2, 3, 12, 0);
        orchestrator.tick(day2).await.unwrap();
        assert_eq!(executor.open_position_count().await, 2, "new day resets the cap");
    }
}
