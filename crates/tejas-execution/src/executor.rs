//! The trading state machine: capital accounting, the BUY/SELL order
//! lifecycle, FIFO position close, startup recovery and orphan
//! reconciliation. Every fallible step returns an explicit `Result` or
//! `Option` rather than relying on a caught exception to signal failure.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use tejas_config::AntiHedgingScope;
use tejas_schemas::{
    ExitReasonCategory, Order, OrderSide, OrderStatus, OptionType, Position, Trade,
};
use tejas_store::{PositionPatch, Store};
use tejas_strategy::{OpenPositionSnapshot, Signal, SignalAction, Strategy};

use crate::config::ExecutorConfig;
use crate::error::RejectionReason;
use crate::position_key::{PositionKey, PositionKeyToken};
use crate::ExecutionError;

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub recovered: usize,
    pub orphans_closed: usize,
}

/// Result of [`VirtualExecutor::verify_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub positions_checked: usize,
    pub positions_missing_backing_order: usize,
    pub orders_missing_backing_position: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.positions_missing_backing_order == 0 && self.orders_missing_backing_position == 0
    }
}

struct CapitalRelease {
    to_available: Decimal,
    from_margin: Decimal,
}

pub struct VirtualExecutor {
    config: ExecutorConfig,
    store: Arc<dyn Store>,
    initial_capital: Decimal,
    available_capital: Mutex<Decimal>,
    used_margin: Mutex<Decimal>,
    positions: Mutex<HashMap<PositionKey, Position>>,
    next_sequence: AtomicU64,
    reconciliation_pending: Mutex<HashSet<String>>,
}

impl VirtualExecutor {
    pub fn new(config: ExecutorConfig, store: Arc<dyn Store>, initial_capital: Decimal) -> Self {
        Self {
            config,
            store,
            initial_capital,
            available_capital: Mutex::new(initial_capital),
            used_margin: Mutex::new(Decimal::ZERO),
            positions: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
            reconciliation_pending: Mutex::new(HashSet::new()),
        }
    }

    pub async fn available_capital(&self) -> Decimal {
        *self.available_capital.lock().await
    }

    pub async fn used_margin(&self) -> Decimal {
        *self.used_margin.lock().await
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    pub async fn open_position_count(&self) -> usize {
        self.positions.lock().await.len()
    }

    pub async fn reconciliation_pending(&self, symbol: &str) -> bool {
        self.reconciliation_pending.lock().await.contains(symbol)
    }

    pub async fn clear_reconciliation(&self, symbol: &str) {
        self.reconciliation_pending.lock().await.remove(symbol);
    }

    /// Read-only view of a strategy's own open positions — or, under
    /// `AntiHedgingScope::Global`, every strategy's — passed into
    /// `Strategy::generate_signals` instead of giving strategies a
    /// back-reference to this executor.
    pub async fn open_position_snapshot(
        &self,
        strategy_name: &str,
        scope: AntiHedgingScope,
    ) -> OpenPositionSnapshot {
        let positions = self.positions.lock().await;
        let mut by_symbol = HashMap::new();
        for p in positions.values() {
            if !p.is_open {
                continue;
            }
            if scope == AntiHedgingScope::PerStrategy && p.strategy_name != strategy_name {
                continue;
            }
            by_symbol.insert(p.symbol.clone(), p.option_type);
        }
        OpenPositionSnapshot { by_symbol }
    }

    /// Distinct symbols with an open position for a strategy — the set of
    /// quotes a monitoring tick needs to fetch for it.
    pub async fn open_symbols(&self, strategy_name: &str) -> Vec<String> {
        let positions = self.positions.lock().await;
        let mut symbols: Vec<String> = positions
            .values()
            .filter(|p| p.is_open && p.strategy_name == strategy_name)
            .map(|p| p.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Full snapshot of the in-memory position map, keyed and cloned —
    /// used by the force-exit sweep and DailyPnL aggregation, both of
    /// which need every open position regardless of which strategy owns it.
    pub async fn open_positions_raw(&self) -> Vec<(PositionKey, Position)> {
        self.positions
            .lock()
            .await
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect()
    }

    fn next_key(&self, symbol: &str) -> PositionKey {
        let seq = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        PositionKey {
            symbol: symbol.to_string(),
            token: PositionKeyToken::Sequence(seq),
        }
    }

    fn execution_price(&self, market_price: Decimal, is_buy: bool) -> Decimal {
        let factor = Decimal::from(self.config.slippage_bps) / Decimal::from(10_000);
        if is_buy {
            market_price * (Decimal::ONE + factor)
        } else {
            market_price * (Decimal::ONE - factor)
        }
    }

    async fn validate(
        &self,
        signal: &Signal,
        strategy_name: &str,
        market_price: Decimal,
    ) -> Result<(), RejectionReason> {
        if market_price <= Decimal::ZERO {
            return Err(RejectionReason::NonPositivePrice);
        }

        if signal.action.is_entry() {
            if self
                .reconciliation_pending
                .lock()
                .await
                .contains(&signal.symbol)
            {
                return Err(RejectionReason::ReconciliationPending);
            }

            let open_count = self.positions.lock().await.len() as i64;
            if open_count >= self.config.max_positions {
                return Err(RejectionReason::MaxPositionsReached);
            }

            let required_capital = market_price * Decimal::from(signal.quantity);
            if required_capital > self.config.max_position_size {
                return Err(RejectionReason::PositionTooLarge);
            }
            let available = *self.available_capital.lock().await;
            if required_capital > available {
                return Err(RejectionReason::InsufficientCapital);
            }
            return Ok(());
        }

        // SELL: must find a matching open position in BOTH the in-memory
        // map AND a fresh Store query, so a stale in-memory snapshot can
        // never authorize an orphan SELL across a restart.
        let option_type = signal.action.option_type();
        let mem_ok = self.positions.lock().await.values().any(|p| {
            p.is_open
                && p.symbol == signal.symbol
                && p.option_type == option_type
                && p.quantity >= signal.quantity
        });
        if !mem_ok {
            return Err(RejectionReason::SellWithoutPosition);
        }

        let store_positions = self
            .store
            .get_open_positions(self.config.mode)
            .await
            .map_err(|_| RejectionReason::SellWithoutPosition)?;
        let store_qty: i64 = store_positions
            .iter()
            .filter(|p| p.symbol == signal.symbol && p.option_type == option_type)
            .map(|p| p.quantity)
            .sum();
        if store_qty < signal.quantity {
            return Err(RejectionReason::SellWithoutPosition);
        }

        Ok(())
    }

    /// Validate, price, persist, and execute a signal. Returns the order id
    /// on success; `None` on any rejection or abort — `place_order` never
    /// propagates an error to its caller, matching the source's "return
    /// order id or empty string" contract exactly.
    pub async fn place_order(
        &self,
        signal: &Signal,
        strategy_name: &str,
        market_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Uuid> {
        if let Err(reason) = self.validate(signal, strategy_name, market_price).await {
            info!(symbol = %signal.symbol, %reason, "signal rejected");
            return None;
        }

        let side = if signal.action.is_entry() {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let execution_price = self.execution_price(market_price, side == OrderSide::Buy);
        let order = Order {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            mode: self.config.mode,
            symbol: signal.symbol.clone(),
            side,
            quantity: signal.quantity,
            price: execution_price,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            filled_price: None,
            filled_at: None,
            signal_metadata: signal.metadata.clone(),
            created_at: now,
            updated_at: now,
        };

        self.execute(order, signal.action.option_type(), execution_price, now)
            .await
    }

    async fn execute(
        &self,
        mut order: Order,
        option_type: OptionType,
        execution_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Uuid> {
        let fees = self.config.fee_per_order;
        let cost = execution_price * Decimal::from(order.quantity) + fees;
        let is_buy = order.side == OrderSide::Buy;

        if is_buy {
            let available = *self.available_capital.lock().await;
            if cost > available {
                warn!(symbol = %order.symbol, "order rejected at execution — insufficient capital");
                return None;
            }
        }

        order.status = OrderStatus::Filled;
        order.filled_quantity = order.quantity;
        order.filled_price = Some(execution_price);
        order.filled_at = Some(now);
        order.updated_at = now;

        if let Err(e) = self.store.save_order(&order).await {
            if is_buy {
                error!(symbol = %order.symbol, error = %e, "BUY order save failed — aborting, no position created");
                return None;
            }
            error!(
                symbol = %order.symbol, error = %e,
                "SELL order save failed after retries — closing position anyway to avoid a stuck open position"
            );
            self.reconciliation_pending
                .lock()
                .await
                .insert(order.symbol.clone());
        }

        if is_buy {
            match self
                .create_position(&order, option_type, fees, execution_price, now)
                .await
            {
                Some(_) => {
                    *self.available_capital.lock().await -= cost;
                    *self.used_margin.lock().await += cost;
                    Some(order.id)
                }
                None => {
                    error!(
                        symbol = %order.symbol,
                        "position could not be created for a saved BUY order — invariant broken, capital left untouched"
                    );
                    None
                }
            }
        } else {
            match self.close_matching_position(&order, option_type, now).await {
                Some(release) => {
                    *self.available_capital.lock().await += release.to_available;
                    *self.used_margin.lock().await -= release.from_margin;
                    Some(order.id)
                }
                None => {
                    error!(symbol = %order.symbol, "no matching open position found for SELL order");
                    None
                }
            }
        }
    }

    async fn create_position(
        &self,
        order: &Order,
        option_type: OptionType,
        fees: Decimal,
        execution_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<PositionKey> {
        let position = Position {
            id: Uuid::new_v4(),
            strategy_name: order.strategy_name.clone(),
            mode: order.mode,
            symbol: order.symbol.clone(),
            option_type,
            quantity: order.quantity,
            original_quantity: order.quantity,
            average_price: execution_price,
            current_price: execution_price,
            entry_time: now,
            exit_time: None,
            exit_price: None,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            pnl_fraction: Decimal::ZERO,
            is_open: true,
            exit_reason: None,
            exit_reason_category: None,
            entry_fees: fees,
            buy_order_id: order.id,
            sell_order_id: None,
            peak_price: execution_price,
        };

        if let Err(e) = self.store.save_position(&position).await {
            error!(symbol = %order.symbol, error = %e, "position save failed");
            return None;
        }

        let key = self.next_key(&order.symbol);
        self.positions.lock().await.insert(key.clone(), position);
        Some(key)
    }

    /// FIFO-by-entry-time close. Mutates the in-memory entry to closed
    /// before the Store round trip, and only removes it from the map after
    /// that round trip succeeds — a Store failure here leaves the position
    /// closed in memory (so it can never be matched again) but still
    /// present, never silently lost.
    async fn close_matching_position(
        &self,
        order: &Order,
        option_type: OptionType,
        now: DateTime<Utc>,
    ) -> Option<CapitalRelease> {
        let (key, entry_price, original_quantity, entry_fees, entry_time, position_id) = {
            let mut positions = self.positions.lock().await;
            let key = positions
                .iter()
                .filter(|(_, p)| {
                    p.is_open
                        && p.symbol == order.symbol
                        && p.option_type == option_type
                        && p.quantity == order.quantity
                })
                .min_by_key(|(_, p)| p.entry_time)
                .map(|(k, _)| k.clone())?;

            let exit_price = order.price;
            let (reason, category) = exit_reason_from_metadata(&order.signal_metadata);
            let p = positions.get_mut(&key)?;
            let realized_pnl = (exit_price - p.average_price) * Decimal::from(p.original_quantity);
            let pnl_fraction = if p.average_price > Decimal::ZERO {
                (exit_price - p.average_price) / p.average_price
            } else {
                Decimal::ZERO
            };

            p.quantity = 0;
            p.is_open = false;
            p.current_price = exit_price;
            p.exit_time = Some(now);
            p.exit_price = Some(exit_price);
            p.unrealized_pnl = Decimal::ZERO;
            p.realized_pnl = realized_pnl;
            p.pnl_fraction = pnl_fraction;
            p.exit_reason = Some(reason);
            p.exit_reason_category = Some(category);
            p.sell_order_id = Some(order.id);

            (
                key,
                p.average_price,
                p.original_quantity,
                p.entry_fees,
                p.entry_time,
                p.id,
            )
        };

        let closed_position = { self.positions.lock().await.get(&key).cloned()? };
        let realized_pnl = closed_position.realized_pnl;
        let exit_price = closed_position.exit_price.unwrap_or(order.price);

        let patch = PositionPatch {
            quantity: Some(0),
            current_price: Some(exit_price),
            unrealized_pnl: Some(Decimal::ZERO),
            realized_pnl: Some(realized_pnl),
            pnl_fraction: Some(closed_position.pnl_fraction),
            is_open: Some(false),
            exit_time: Some(now),
            exit_price: Some(exit_price),
            exit_reason: closed_position.exit_reason.clone(),
            exit_reason_category: closed_position.exit_reason_category,
            sell_order_id: Some(order.id),
        };

        match self.store.update_position(position_id, patch).await {
            Ok(()) => {
                self.positions.lock().await.remove(&key);
            }
            Err(e) => {
                error!(
                    symbol = %order.symbol, error = %e,
                    "Store update on position close failed — position stays closed in memory, only"
                );
            }
        }

        let hold_minutes = (now - entry_time).num_seconds() as f64 / 60.0;
        let trade = Trade {
            id: Uuid::new_v4(),
            strategy_name: order.strategy_name.clone(),
            mode: order.mode,
            symbol: order.symbol.clone(),
            entry_price,
            exit_price,
            quantity: original_quantity,
            pnl: realized_pnl,
            pnl_fraction: closed_position.pnl_fraction,
            entry_time,
            exit_time: now,
            hold_duration_minutes: hold_minutes.round() as i64,
            exit_reason: closed_position
                .exit_reason
                .clone()
                .unwrap_or_else(|| "strategy exit".to_string()),
            entry_signal_data: order.signal_metadata.clone(),
            fees: entry_fees,
            slippage: Decimal::ZERO,
        };
        if let Err(e) = self.store.insert_trade(&trade).await {
            warn!(symbol = %order.symbol, error = %e, "trade record insert failed — reporting gap only");
        }

        Some(CapitalRelease {
            to_available: entry_price * Decimal::from(original_quantity) + entry_fees + realized_pnl,
            from_margin: entry_price * Decimal::from(original_quantity) + entry_fees,
        })
    }

    /// Per-tick monitoring: refresh each open position's current price,
    /// advance its trailing-stop peak, ask the strategy whether to exit,
    /// and route any exit through `place_order` so it goes through the
    /// same validation/persistence pipeline a strategy-initiated SELL does.
    pub async fn monitor_positions(
        &self,
        strategy_name: &str,
        strategy: &dyn Strategy,
        quotes: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> Vec<Uuid> {
        let snapshot: Vec<(PositionKey, Position)> = {
            let positions = self.positions.lock().await;
            positions
                .iter()
                .filter(|(_, p)| p.is_open && p.strategy_name == strategy_name)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect()
        };

        let mut closed = Vec::new();
        for (key, mut position) in snapshot {
            let Some(&price) = quotes.get(&position.symbol) else {
                continue;
            };

            let peak = position.peak_price.max(price);
            let unrealized = (price - position.average_price) * Decimal::from(position.quantity);

            {
                let mut positions = self.positions.lock().await;
                if let Some(p) = positions.get_mut(&key) {
                    p.current_price = price;
                    p.unrealized_pnl = unrealized;
                    p.peak_price = peak;
                }
            }
            position.current_price = price;
            position.unrealized_pnl = unrealized;
            position.peak_price = peak;

            let _ = self
                .store
                .update_position(
                    position.id,
                    PositionPatch {
                        current_price: Some(price),
                        unrealized_pnl: Some(unrealized),
                        ..Default::default()
                    },
                )
                .await;

            let decision = strategy.should_exit(&position, price, now);
            if decision.should_exit {
                let action = match position.option_type {
                    OptionType::Ce => SignalAction::SellCall,
                    OptionType::Pe => SignalAction::SellPut,
                };
                let category = decision.category.unwrap_or(ExitReasonCategory::Other);
                let signal = Signal {
                    action,
                    symbol: position.symbol.clone(),
                    quantity: position.original_quantity,
                    metadata: serde_json::json!({
                        "reason": decision.reason,
                        "exit_reason_category": category.as_str(),
                    }),
                };
                if let Some(id) = self
                    .place_order(&signal, strategy_name, price, now)
                    .await
                {
                    closed.push(id);
                }
            }
        }
        closed
    }

    /// Manual/force-exit close, bypassing `Strategy::should_exit` entirely —
    /// a forced close must always succeed regardless of any strategy-level
    /// minimum-hold rule.
    pub async fn close_position(
        &self,
        symbol: &str,
        option_type: OptionType,
        quantity: i64,
        strategy_name: &str,
        price: Decimal,
        now: DateTime<Utc>,
        category: ExitReasonCategory,
        reason: &str,
    ) -> Option<Uuid> {
        let action = match option_type {
            OptionType::Ce => SignalAction::SellCall,
            OptionType::Pe => SignalAction::SellPut,
        };
        let signal = Signal {
            action,
            symbol: symbol.to_string(),
            quantity,
            metadata: serde_json::json!({"reason": reason, "exit_reason_category": category.as_str()}),
        };
        self.place_order(&signal, strategy_name, price, now).await
    }

    /// Startup recovery: reload open positions, reconciling
    /// orphans (an open position with a recorded SELL order) against that
    /// SELL's price/timestamp rather than bringing them back into memory.
    /// Idempotent: rerunning against an unchanged Store produces the same
    /// map, because a recovered position's key is derived from its Store
    /// row id, not from a counter this call advances.
    pub async fn recover(&self) -> Result<RecoveryReport, ExecutionError> {
        let open = self.store.get_open_positions(self.config.mode).await?;
        let mut report = RecoveryReport::default();
        let mut positions = self.positions.lock().await;
        positions.clear();

        for mut pos in open {
            let sells = self
                .store
                .get_orders_by_symbol_strategy_side(
                    &pos.symbol,
                    &pos.strategy_name,
                    OrderSide::Sell,
                    self.config.mode,
                )
                .await?;

            if let Some(sell_order) = sells.first() {
                let realized_pnl =
                    (sell_order.price - pos.average_price) * Decimal::from(pos.original_quantity);
                let pnl_fraction = if pos.average_price > Decimal::ZERO {
                    (sell_order.price - pos.average_price) / pos.average_price
                } else {
                    Decimal::ZERO
                };
                let patch = PositionPatch {
                    quantity: Some(0),
                    current_price: Some(sell_order.price),
                    unrealized_pnl: Some(Decimal::ZERO),
                    realized_pnl: Some(realized_pnl),
                    pnl_fraction: Some(pnl_fraction),
                    is_open: Some(false),
                    exit_time: Some(sell_order.created_at),
                    exit_price: Some(sell_order.price),
                    exit_reason: Some("orphan reconciliation on startup".to_string()),
                    exit_reason_category: Some(ExitReasonCategory::Other),
                    sell_order_id: Some(sell_order.id),
                };
                match self.store.update_position(pos.id, patch).await {
                    Ok(()) => {
                        report.orphans_closed += 1;
                        info!(symbol = %pos.symbol, position_id = %pos.id, "orphaned position reconciled on startup");
                    }
                    Err(e) => {
                        error!(symbol = %pos.symbol, error = %e, "orphan reconciliation failed — will retry next startup");
                    }
                }
                continue;
            }

            pos.peak_price = pos.average_price;
            let key = PositionKey {
                symbol: pos.symbol.clone(),
                token: PositionKeyToken::Recovered(pos.id),
            };
            positions.insert(key, pos);
            report.recovered += 1;
        }

        Ok(report)
    }

    /// Read-only audit over the in-memory open-position map: for each
    /// position, confirms its `buy_order_id` resolves to a Filled BUY order
    /// in the Store; for each (symbol, strategy) pair holding an open
    /// position, confirms the Store doesn't hold more Filled BUY orders for
    /// that pair than open positions accounted for. Scoped to currently-open
    /// positions — `Store` has no "every order ever placed" query to replay
    /// against, so this is an O(n) check over live state, not a full
    /// ledger replay. Intended for tests and operator audit, not the tick
    /// loop's hot path.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, ExecutionError> {
        let in_memory = self.open_positions_raw().await;
        let mut report = IntegrityReport {
            positions_checked: in_memory.len(),
            ..Default::default()
        };

        let mut open_counts: HashMap<(String, String), usize> = HashMap::new();
        let mut buy_orders_by_group: HashMap<(String, String), Vec<Order>> = HashMap::new();

        for (_, position) in &in_memory {
            let group = (position.symbol.clone(), position.strategy_name.clone());
            *open_counts.entry(group.clone()).or_insert(0) += 1;

            let buy_orders = match buy_orders_by_group.get(&group) {
                Some(orders) => orders,
                None => {
                    let orders = self
                        .store
                        .get_orders_by_symbol_strategy_side(
                            &position.symbol,
                            &position.strategy_name,
                            OrderSide::Buy,
                            self.config.mode,
                        )
                        .await?;
                    buy_orders_by_group.entry(group.clone()).or_insert(orders)
                }
            };

            let has_backing_order = buy_orders
                .iter()
                .any(|o| o.id == position.buy_order_id && o.status == OrderStatus::Filled);
            if !has_backing_order {
                report.positions_missing_backing_order += 1;
            }
        }

        for (group, open_count) in &open_counts {
            let filled = buy_orders_by_group
                .get(group)
                .map(|orders| orders.iter().filter(|o| o.status == OrderStatus::Filled).count())
                .unwrap_or(0);
            report.orders_missing_backing_position += filled.saturating_sub(*open_count);
        }

        Ok(report)
    }
}

fn exit_reason_from_metadata(metadata: &serde_json::Value) -> (String, ExitReasonCategory) {
    let reason = metadata
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("strategy exit")
        .to_string();
    let category = metadata
        .get("exit_reason_category")
        .and_then(|v| v.as_str())
        .map(category_from_str)
        .unwrap_or(ExitReasonCategory::Other);
    (reason, category)
}

fn category_from_str(s: &str) -> ExitReasonCategory {
    match s {
        "PROFIT_TARGET" => ExitReasonCategory::ProfitTarget,
        "STOP_LOSS" => ExitReasonCategory::StopLoss,
        "TIME_STOP" => ExitReasonCategory::TimeStop,
        "TREND_REVERSAL" => ExitReasonCategory::TrendReversal,
        "FORCE_EXIT" => ExitReasonCategory::ForceExit,
        "MANUAL" => ExitReasonCategory::Manual,
        "MIN_HOLD_TIME" => ExitReasonCategory::MinHoldTime,
        "ERROR" => ExitReasonCategory::Error,
        _ => ExitReasonCategory::Other,
    }
}
