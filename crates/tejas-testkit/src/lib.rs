//! Shared fixtures for end-to-end scenario tests: an in-memory `Store`, a
//! scriptable `Broker`, and a `StaticResolver` that always resolves a strike
//! to a symbol, so `tests/` can wire a real `VirtualExecutor` and
//! `SupertrendReversalStrategy` together without a database or brokerage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use uuid::Uuid;

use tejas_broker::types::{
    BrokerHolding, BrokerPositionRow, CandleSeries, Interval, InstrumentMaster, PlaceOrderRequest,
    Quote,
};
use tejas_broker::{Broker, BrokerError};
use tejas_schemas::{Candle, DailyPnl, Order, OrderSide, Position, Trade, TradingMode};
use tejas_store::{PositionPatch, Store, StoreError};
use tejas_strategy::resolver::{ResolvedInstrument, SymbolResolver};

/// Every symbol resolves to itself with a fixed lot size, matching the
/// literal `NIFTY...25050CE`-style symbols the scenario values use.
pub struct StaticResolver {
    pub lot_size: i64,
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self { lot_size: 75 }
    }
}

impl SymbolResolver for StaticResolver {
    fn resolve(&self, strike: i64, option_type: tejas_schemas::OptionType) -> Option<ResolvedInstrument> {
        Some(ResolvedInstrument {
            symbol: format!("NIFTY{strike}{}", option_type.as_str()),
            lot_size: self.lot_size,
        })
    }
}

/// Scriptable broker: candles and LTPs are pre-seeded by the test, `quote`
/// always fails (no scenario here depends on a live quote feed).
#[derive(Default)]
pub struct FakeBroker {
    candles: StdMutex<Vec<Candle>>,
    prices: StdMutex<HashMap<String, Decimal>>,
}

impl FakeBroker {
    pub fn set_candles(&self, candles: Vec<Candle>) {
        *self.candles.lock().unwrap() = candles;
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
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
        Err(BrokerError::transient("no live quote feed in this fixture"))
    }

    async fn historical(
        &self,
        _instrument_token: i64,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        _interval: Interval,
    ) -> Result<CandleSeries, BrokerError> {
        Ok(self.candles.lock().unwrap().clone())
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
pub struct FakeStore {
    pub orders: StdMutex<Vec<Order>>,
    pub positions: StdMutex<HashMap<Uuid, Position>>,
    pub trades: StdMutex<Vec<Trade>>,
    pub daily_pnl: StdMutex<Vec<DailyPnl>>,
}

impl FakeStore {
    pub fn seed_position(&self, position: Position) {
        self.positions.lock().unwrap().insert(position.id, position);
    }

    pub fn seed_order(&self, order: Order) {
        self.orders.lock().unwrap().push(order);
    }
}

#[async_trait]
impl Store for FakeStore {
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
            .filter(|t| t.strategy_name == strategy_name && t.mode == mode && t.entry_time >= since)
            .cloned()
            .collect())
    }

    async fn upsert_daily_pnl(&self, row: &DailyPnl) -> Result<(), StoreError> {
        self.daily_pnl.lock().unwrap().push(row.clone());
        Ok(())
    }
}

/// A position with every field set to an unexceptional default, so a
/// scenario test only needs to override the handful of fields it cares
/// about via struct-update syntax.
pub fn blank_open_position(symbol: &str, entry_price: Decimal, entry_time: DateTime<Utc>) -> Position {
    Position {
        id: Uuid::new_v4(),
        strategy_name: "supertrend".to_string(),
        mode: TradingMode::Paper,
        symbol: symbol.to_string(),
        option_type: tejas_schemas::OptionType::Ce,
        quantity: 75,
        original_quantity: 75,
        average_price: entry_price,
        current_price: entry_price,
        entry_time,
        exit_time: None,
        exit_price: None,
        unrealized_pnl: Decimal::ZERO,
        realized_pnl: Decimal::ZERO,
        pnl_fraction: Decimal::ZERO,
        is_open: true,
        exit_reason: None,
        exit_reason_category: None,
        entry_fees: Decimal::ZERO,
        buy_order_id: Uuid::new_v4(),
        sell_order_id: None,
        peak_price: entry_price,
    }
}
