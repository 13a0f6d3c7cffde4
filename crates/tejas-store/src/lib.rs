//! Typed CRUD over {strategies, orders, positions, trades, daily_pnl,
//! strategy_signals}, backed by Postgres via `sqlx`. Retry/backoff wraps
//! only transient connection failures; validation and constraint failures
//! propagate immediately.

pub mod error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub use error::StoreError;

use tejas_schemas::{
    ExitReasonCategory, Order, OrderSide, OrderStatus, OptionType, Position, TradingMode,
};

pub const ENV_DB_URL: &str = "TEJAS_STORE_DATABASE_URL";

/// Delays between retry attempts for a transient Store failure: 0.5s,
/// 1.0s, 2.0s.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

pub async fn connect_from_env() -> anyhow::Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .map_err(|_| anyhow::anyhow!("missing env var {ENV_DB_URL}"))?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn with_retry<T, F, Fut>(op_name: &str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0usize;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let classified = StoreError::classify(e);
                if classified.is_transient() && attempt < RETRY_DELAYS.len() {
                    warn!(op = op_name, attempt, "retrying transient store error");
                    tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                    attempt += 1;
                    continue;
                }
                return Err(classified);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionPatch {
    pub quantity: Option<i64>,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub pnl_fraction: Option<Decimal>,
    pub is_open: Option<bool>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub exit_reason_category: Option<ExitReasonCategory>,
    pub sell_order_id: Option<Uuid>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_order(&self, order: &Order) -> Result<Uuid, StoreError>;
    async fn save_position(&self, position: &Position) -> Result<Uuid, StoreError>;
    async fn update_position(&self, id: Uuid, patch: PositionPatch) -> Result<(), StoreError>;
    async fn get_open_positions(&self, mode: TradingMode) -> Result<Vec<Position>, StoreError>;
    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError>;
    async fn get_orders_by_symbol(
        &self,
        symbol: &str,
        mode: TradingMode,
    ) -> Result<Vec<Order>, StoreError>;
    async fn get_orders_by_symbol_strategy_side(
        &self,
        symbol: &str,
        strategy_name: &str,
        side: OrderSide,
        mode: TradingMode,
    ) -> Result<Vec<Order>, StoreError>;
    async fn insert_trade(&self, trade: &tejas_schemas::Trade) -> Result<Uuid, StoreError>;
    async fn get_trades_since(
        &self,
        strategy_name: &str,
        mode: TradingMode,
        since: DateTime<Utc>,
    ) -> Result<Vec<tejas_schemas::Trade>, StoreError>;
    async fn upsert_daily_pnl(&self, row: &tejas_schemas::DailyPnl) -> Result<(), StoreError>;
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Sum of open-position quantities for (symbol, mode) — used by
    /// `save_order`'s SELL validation gate.
    async fn open_quantity(&self, symbol: &str, mode: TradingMode) -> Result<i64, StoreError> {
        let row = with_retry("open_quantity", || async {
            sqlx::query(
                "select coalesce(sum(quantity), 0)::bigint as qty from positions \
                 where symbol = $1 and trading_mode = $2 and is_open = true",
            )
            .bind(symbol)
            .bind(mode.as_str())
            .fetch_one(&self.pool)
            .await
        })
        .await?;
        Ok(row.get::<i64, _>("qty"))
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn save_order(&self, order: &Order) -> Result<Uuid, StoreError> {
        // Validation gate, run before any write:
        if order.symbol.trim().is_empty() || order.quantity <= 0 || order.price <= Decimal::ZERO {
            return Err(StoreError::Validation(
                "order missing required fields (symbol/quantity/price)".to_string(),
            ));
        }
        if order.side == OrderSide::Sell {
            let open_qty = self.open_quantity(&order.symbol, order.mode).await?;
            if open_qty < order.quantity {
                return Err(StoreError::Validation(format!(
                    "SELL {} qty {} exceeds open quantity {open_qty}",
                    order.symbol, order.quantity
                )));
            }
        }

        with_retry("save_order", || async {
            sqlx::query(
                "insert into orders (id, strategy_name, trading_mode, symbol, order_type, \
                 quantity, price, status, filled_quantity, filled_price, filled_at, \
                 signal_data, created_at, updated_at) \
                 values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) \
                 on conflict (id) do update set \
                   status = excluded.status, \
                   filled_quantity = excluded.filled_quantity, \
                   filled_price = excluded.filled_price, \
                   filled_at = excluded.filled_at, \
                   updated_at = excluded.updated_at",
            )
            .bind(order.id)
            .bind(&order.strategy_name)
            .bind(order.mode.as_str())
            .bind(&order.symbol)
            .bind(order.side.as_str())
            .bind(order.quantity)
            .bind(order.price)
            .bind(order.status.as_str())
            .bind(order.filled_quantity)
            .bind(order.filled_price)
            .bind(order.filled_at)
            .bind(&order.signal_metadata)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(order.id)
    }

    async fn save_position(&self, position: &Position) -> Result<Uuid, StoreError> {
        if position.is_open
            && (position.quantity <= 0 || position.average_price <= Decimal::ZERO)
        {
            return Err(StoreError::Validation(
                "new open position requires positive quantity and average_price".to_string(),
            ));
        }

        with_retry("save_position", || async {
            sqlx::query(
                "insert into positions (id, strategy_name, trading_mode, symbol, option_type, \
                 quantity, original_quantity, average_price, current_price, unrealized_pnl, \
                 realized_pnl, pnl_fraction, is_open, entry_time, exit_time, exit_price, \
                 exit_reason, exit_reason_category, entry_fees, buy_order_id, sell_order_id, \
                 created_at, updated_at) \
                 values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,now(),now()) \
                 on conflict (id) do update set \
                   quantity = excluded.quantity, \
                   current_price = excluded.current_price, \
                   unrealized_pnl = excluded.unrealized_pnl, \
                   realized_pnl = excluded.realized_pnl, \
                   pnl_fraction = excluded.pnl_fraction, \
                   is_open = excluded.is_open, \
                   exit_time = excluded.exit_time, \
                   exit_price = excluded.exit_price, \
                   exit_reason = excluded.exit_reason, \
                   exit_reason_category = excluded.exit_reason_category, \
                   sell_order_id = excluded.sell_order_id, \
                   updated_at = now()",
            )
            .bind(position.id)
            .bind(&position.strategy_name)
            .bind(position.mode.as_str())
            .bind(&position.symbol)
            .bind(position.option_type.as_str())
            .bind(position.quantity)
            .bind(position.original_quantity)
            .bind(position.average_price)
            .bind(position.current_price)
            .bind(position.unrealized_pnl)
            .bind(position.realized_pnl)
            .bind(position.pnl_fraction)
            .bind(position.is_open)
            .bind(position.entry_time)
            .bind(position.exit_time)
            .bind(position.exit_price)
            .bind(position.exit_reason.as_deref())
            .bind(position.exit_reason_category.map(|c| c.as_str()))
            .bind(position.entry_fees)
            .bind(position.buy_order_id)
            .bind(position.sell_order_id)
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(position.id)
    }

    async fn update_position(&self, id: Uuid, patch: PositionPatch) -> Result<(), StoreError> {
        with_retry("update_position", || async {
            sqlx::query(
                "update positions set \
                   quantity = coalesce($2, quantity), \
                   current_price = coalesce($3, current_price), \
                   unrealized_pnl = coalesce($4, unrealized_pnl), \
                   realized_pnl = coalesce($5, realized_pnl), \
                   pnl_fraction = coalesce($6, pnl_fraction), \
                   is_open = coalesce($7, is_open), \
                   exit_time = coalesce($8, exit_time), \
                   exit_price = coalesce($9, exit_price), \
                   exit_reason = coalesce($10, exit_reason), \
                   exit_reason_category = coalesce($11, exit_reason_category), \
                   sell_order_id = coalesce($12, sell_order_id), \
                   updated_at = now() \
                 where id = $1",
            )
            .bind(id)
            .bind(patch.quantity)
            .bind(patch.current_price)
            .bind(patch.unrealized_pnl)
            .bind(patch.realized_pnl)
            .bind(patch.pnl_fraction)
            .bind(patch.is_open)
            .bind(patch.exit_time)
            .bind(patch.exit_price)
            .bind(patch.exit_reason.as_deref())
            .bind(patch.exit_reason_category.map(|c| c.as_str()))
            .bind(patch.sell_order_id)
            .execute(&self.pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn get_open_positions(&self, mode: TradingMode) -> Result<Vec<Position>, StoreError> {
        let rows = with_retry("get_open_positions", || async {
            sqlx::query(
                "select * from positions where trading_mode = $1 and is_open = true \
                 order by entry_time asc",
            )
            .bind(mode.as_str())
            .fetch_all(&self.pool)
            .await
        })
        .await?;
        rows.iter().map(row_to_position).collect()
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, StoreError> {
        let row = with_retry("get_position", || async {
            sqlx::query("select * from positions where id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
        })
        .await?;
        row.map(|r| row_to_position(&r)).transpose()
    }

    async fn get_orders_by_symbol(
        &self,
        symbol: &str,
        mode: TradingMode,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = with_retry("get_orders_by_symbol", || async {
            sqlx::query(
                "select * from orders where symbol = $1 and trading_mode = $2 \
                 order by created_at asc",
            )
            .bind(symbol)
            .bind(mode.as_str())
            .fetch_all(&self.pool)
            .await
        })
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn get_orders_by_symbol_strategy_side(
        &self,
        symbol: &str,
        strategy_name: &str,
        side: OrderSide,
        mode: TradingMode,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = with_retry("get_orders_by_symbol_strategy_side", || async {
            sqlx::query(
                "select * from orders where symbol = $1 and strategy_name = $2 \
                 and order_type = $3 and trading_mode = $4 order by created_at asc",
            )
            .bind(symbol)
            .bind(strategy_name)
            .bind(side.as_str())
            .bind(mode.as_str())
            .fetch_all(&self.pool)
            .await
        })
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn insert_trade(&self, trade: &tejas_schemas::Trade) -> Result<Uuid, StoreError> {
        with_retry("insert_trade", || async {
            sqlx::query(
                "insert into trades (id, strategy_name, trading_mode, symbol, entry_price, \
                 exit_price, quantity, pnl, pnl_percentage, entry_time, exit_time, \
                 hold_duration_minutes, exit_reason, entry_signal_data, fees, slippage) \
                 values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)",
            )
            .bind(trade.id)
            .bind(&trade.strategy_name)
            .bind(trade.mode.as_str())
            .bind(&trade.symbol)
            .bind(trade.entry_price)
            .bind(trade.exit_price)
            .bind(trade.quantity)
            .bind(trade.pnl)
            .bind(trade.pnl_fraction)
            .bind(trade.entry_time)
            .bind(trade.exit_time)
            .bind(trade.hold_duration_minutes)
            .bind(&trade.exit_reason)
            .bind(&trade.entry_signal_data)
            .bind(trade.fees)
            .bind(trade.slippage)
            .execute(&self.pool)
            .await
        })
        .await?;
        Ok(trade.id)
    }

    async fn get_trades_since(
        &self,
        strategy_name: &str,
        mode: TradingMode,
        since: DateTime<Utc>,
    ) -> Result<Vec<tejas_schemas::Trade>, StoreError> {
        let rows = with_retry("get_trades_since", || async {
            sqlx::query(
                "select * from trades where strategy_name = $1 and trading_mode = $2 \
                 and entry_time >= $3 order by entry_time asc",
            )
            .bind(strategy_name)
            .bind(mode.as_str())
            .bind(since)
            .fetch_all(&self.pool)
            .await
        })
        .await?;
        rows.iter().map(row_to_trade).collect()
    }

    async fn upsert_daily_pnl(&self, row: &tejas_schemas::DailyPnl) -> Result<(), StoreError> {
        with_retry("upsert_daily_pnl", || async {
            sqlx::query(
                "insert into daily_pnl (date, strategy_name, trading_mode, realized_pnl, \
                 unrealized_pnl, total_pnl, trades_count, winning_trades, losing_trades, \
                 fees_paid, portfolio_value, updated_at) \
                 values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,now()) \
                 on conflict (date, strategy_name, trading_mode) do update set \
                   realized_pnl = excluded.realized_pnl, \
                   unrealized_pnl = excluded.unrealized_pnl, \
                   total_pnl = excluded.total_pnl, \
                   trades_count = excluded.trades_count, \
                   winning_trades = excluded.winning_trades, \
                   losing_trades = excluded.losing_trades, \
                   fees_paid = excluded.fees_paid, \
                   portfolio_value = excluded.portfolio_value, \
                   updated_at = now()",
            )
            .bind(row.date)
            .bind(&row.strategy_name)
            .bind(row.mode.as_str())
            .bind(row.realized_pnl)
            .bind(row.unrealized_pnl)
            .bind(row.total_pnl)
            .bind(row.trades_count)
            .bind(row.winning_trades)
            .bind(row.losing_trades)
            .bind(row.fees_paid)
            .bind(row.portfolio_value)
            .execute(&self.pool)
            .await
        })
        .await?;
        Ok(())
    }
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    let side_str: String = row.get("order_type");
    let status_str: String = row.get("status");
    let mode_str: String = row.get("trading_mode");
    Ok(Order {
        id: row.get("id"),
        strategy_name: row.get("strategy_name"),
        mode: parse_mode(&mode_str)?,
        symbol: row.get("symbol"),
        side: parse_side(&side_str)?,
        quantity: row.get("quantity"),
        price: row.get("price"),
        status: parse_status(&status_str)?,
        filled_quantity: row.get("filled_quantity"),
        filled_price: row.get("filled_price"),
        filled_at: row.get("filled_at"),
        signal_metadata: row.get("signal_data"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<Position, StoreError> {
    let mode_str: String = row.get("trading_mode");
    let opt_str: String = row.get("option_type");
    let category: Option<String> = row.get("exit_reason_category");
    Ok(Position {
        id: row.get("id"),
        strategy_name: row.get("strategy_name"),
        mode: parse_mode(&mode_str)?,
        symbol: row.get("symbol"),
        option_type: parse_option_type(&opt_str)?,
        quantity: row.get("quantity"),
        original_quantity: row.get("original_quantity"),
        average_price: row.get("average_price"),
        current_price: row.get("current_price"),
        entry_time: row.get("entry_time"),
        exit_time: row.get("exit_time"),
        exit_price: row.get("exit_price"),
        unrealized_pnl: row.get("unrealized_pnl"),
        realized_pnl: row.get("realized_pnl"),
        pnl_fraction: row.get("pnl_fraction"),
        is_open: row.get("is_open"),
        exit_reason: row.get("exit_reason"),
        exit_reason_category: category.map(|c| parse_exit_category(&c)).transpose()?,
        entry_fees: row.get("entry_fees"),
        buy_order_id: row.get("buy_order_id"),
        sell_order_id: row.get("sell_order_id"),
        peak_price: row.get("average_price"),
    })
}

fn row_to_trade(row: &sqlx::postgres::PgRow) -> Result<tejas_schemas::Trade, StoreError> {
    let mode_str: String = row.get("trading_mode");
    Ok(tejas_schemas::Trade {
        id: row.get("id"),
        strategy_name: row.get("strategy_name"),
        mode: parse_mode(&mode_str)?,
        symbol: row.get("symbol"),
        entry_price: row.get("entry_price"),
        exit_price: row.get("exit_price"),
        quantity: row.get("quantity"),
        pnl: row.get("pnl"),
        pnl_fraction: row.get("pnl_percentage"),
        entry_time: row.get("entry_time"),
        exit_time: row.get("exit_time"),
        hold_duration_minutes: row.get("hold_duration_minutes"),
        exit_reason: row.get("exit_reason"),
        entry_signal_data: row.get("entry_signal_data"),
        fees: row.get("fees"),
        slippage: row.get("slippage"),
    })
}

fn parse_mode(s: &str) -> Result<TradingMode, StoreError> {
    s.parse().map_err(StoreError::Validation)
}

fn parse_side(s: &str) -> Result<OrderSide, StoreError> {
    match s {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(StoreError::Validation(format!("bad order_type: {other}"))),
    }
}

fn parse_status(s: &str) -> Result<OrderStatus, StoreError> {
    match s {
        "PENDING" => Ok(OrderStatus::Pending),
        "FILLED" => Ok(OrderStatus::Filled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "CANCELLED" => Ok(OrderStatus::Cancelled),
        other => Err(StoreError::Validation(format!("bad status: {other}"))),
    }
}

fn parse_option_type(s: &str) -> Result<OptionType, StoreError> {
    match s {
        "CE" => Ok(OptionType::Ce),
        "PE" => Ok(OptionType::Pe),
        other => Err(StoreError::Validation(format!("bad option_type: {other}"))),
    }
}

fn parse_exit_category(s: &str) -> Result<ExitReasonCategory, StoreError> {
    Ok(match s {
        "PROFIT_TARGET" => ExitReasonCategory::ProfitTarget,
        "STOP_LOSS" => ExitReasonCategory::StopLoss,
        "TIME_STOP" => ExitReasonCategory::TimeStop,
        "TREND_REVERSAL" => ExitReasonCategory::TrendReversal,
        "FORCE_EXIT" => ExitReasonCategory::ForceExit,
        "MANUAL" => ExitReasonCategory::Manual,
        "MIN_HOLD_TIME" => ExitReasonCategory::MinHoldTime,
        "ERROR" => ExitReasonCategory::Error,
        _ => ExitReasonCategory::Other,
    })
}
