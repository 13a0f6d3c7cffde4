//! The tick loop: market-hours gate, per-strategy signal/exit pipeline,
//! force-exit sweep at cutoff, daily-trade-cap enforcement, and periodic
//! DailyPnL persistence, hosted as a single long-lived task driven by a
//! fixed-interval timer racing a cooperative stop signal.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Asia::Kolkata;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use tejas_broker::types::Interval;
use tejas_broker::Broker;
use tejas_config::AntiHedgingScope;
use tejas_execution::VirtualExecutor;
use tejas_marketdata::MarketDataService;
use tejas_schemas::{ExitReasonCategory, TradingMode};
use tejas_store::Store;

use crate::config::OrchestratorConfig;
use crate::strategy_host::StrategyHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

pub struct Orchestrator<B: Broker> {
    config: OrchestratorConfig,
    mode: TradingMode,
    anti_hedging_scope: AntiHedgingScope,
    market_data: MarketDataService<B>,
    executor: Arc<VirtualExecutor>,
    store: Arc<dyn Store>,
    strategies: StrategyHost,

    tick_count: u64,
    daily_trade_count: i64,
    force_exit_done_today: bool,
    last_reset_date: Option<NaiveDate>,

    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl<B: Broker> Orchestrator<B> {
    pub fn new(
        config: OrchestratorConfig,
        mode: TradingMode,
        anti_hedging_scope: AntiHedgingScope,
        market_data: MarketDataService<B>,
        executor: Arc<VirtualExecutor>,
        store: Arc<dyn Store>,
        strategies: StrategyHost,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            config,
            mode,
            anti_hedging_scope,
            market_data,
            executor,
            store,
            strategies,
            tick_count: 0,
            daily_trade_count: 0,
            force_exit_done_today: false,
            last_reset_date: None,
            running: AtomicBool::new(false),
            stop_tx,
            stop_rx,
        }
    }

    pub fn state(&self) -> RunState {
        if self.running.load(Ordering::SeqCst) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    /// Cooperative shutdown flag: `run` exits its loop on the next tick
    /// boundary after this is called, never mid-tick.
    pub fn stop_handle(&self) -> watch::Sender<bool> {
        self.stop_tx.clone()
    }

    /// Drives the tick loop until `stop_handle().send(true)` is called.
    /// Recovery runs once, before the first tick.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.executor.recover().await?;
        self.running.store(true, Ordering::SeqCst);
        info!("orchestrator started");

        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.tick_interval_seconds,
        ));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "tick failed; continuing");
                    }
                }
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("orchestrator stopped");
        Ok(())
    }

    /// One iteration of the loop, exposed directly so tests can drive it
    /// tick-by-tick against a fixed clock instead of real wall time.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.tick_count += 1;
        self.maybe_reset_daily_counters(now);

        if !self
            .market_data
            .is_market_open(&self.config.reference_symbol, now)
            .await
        {
            return Ok(());
        }

        let ist_now = now.with_timezone(&Kolkata);
        let past_force_exit = (ist_now.time().hour(), ist_now.time().minute())
            >= (self.config.force_exit_hour, self.config.force_exit_minute);

        if past_force_exit && !self.force_exit_done_today {
            self.force_exit_sweep(now).await;
            self.force_exit_done_today = true;
        }

        if !past_force_exit {
            self.process_strategies(now).await;
        }

        self.monitor_all(now).await;

        if self.tick_count % self.config.daily_pnl_persist_every_n_ticks == 0 {
            self.persist_daily_pnl(now).await;
        }

        Ok(())
    }

    async fn process_strategies(&mut self, now: DateTime<Utc>) {
        let spot = self
            .market_data
            .current_price(&self.config.reference_symbol)
            .await;

        let names: Vec<String> = self.strategies.names().map(String::from).collect();
        for name in names {
            let candles = self.market_data.candles(Interval::OneMinute, now).await;
            let snapshot = self
                .executor
                .open_position_snapshot(&name, self.anti_hedging_scope)
                .await;

            let Some(strategy) = self.strategies.get_mut(&name) else {
                continue;
            };
            strategy.update_market_data(&candles, now);
            let signals = strategy.generate_signals(now, spot, &snapshot);

            for signal in signals {
                if self.daily_trade_count >= self.config.max_daily_trades {
                    warn!(strategy = %name, "daily trade cap reached; skipping remaining signals");
                    break;
                }
                let Some(price) = self.market_data.current_price(&signal.symbol).await else {
                    continue;
                };
                if let Some(_order_id) = self.executor.place_order(&signal, &name, price, now).await {
                    self.daily_trade_count += 1;
                }
            }
        }
    }

    async fn monitor_all(&mut self, now: DateTime<Utc>) {
        let names: Vec<String> = self.strategies.names().map(String::from).collect();
        for name in names {
            let symbols = self.executor.open_symbols(&name).await;
            if symbols.is_empty() {
                continue;
            }
            let mut quotes = HashMap::new();
            for symbol in symbols {
                if let Some(price) = self.market_data.current_price(&symbol).await {
                    quotes.insert(symbol, price);
                }
            }
            let Some(strategy) = self.strategies.get(&name) else {
                continue;
            };
            self.executor
                .monitor_positions(&name, strategy, &quotes, now)
                .await;
        }
    }

    /// Union of in-memory and Store open positions, per symbol, closed at
    /// current price with category FORCE_EXIT. A failure on one symbol is
    /// logged and does not abort the rest of the sweep.
    async fn force_exit_sweep(&self, now: DateTime<Utc>) {
        info!("force-exit sweep starting");
        let mut symbols: HashSet<(String, String, tejas_schemas::OptionType, i64)> = HashSet::new();

        for (key, pos) in self.executor.open_positions_raw().await {
            let _ = key;
            symbols.insert((pos.symbol.clone(), pos.strategy_name.clone(), pos.option_type, pos.quantity));
        }

        match self.store.get_open_positions(self.mode).await {
            Ok(rows) => {
                for pos in rows {
                    symbols.insert((pos.symbol.clone(), pos.strategy_name.clone(), pos.option_type, pos.quantity));
                }
            }
            Err(e) => warn!(error = %e, "force-exit sweep: Store open-position lookup failed"),
        }

        for (symbol, strategy_name, option_type, quantity) in symbols {
            let price = self.market_data.current_price(&symbol).await;
            let Some(price) = price else {
                warn!(%symbol, "force-exit sweep: no current price, skipping");
                continue;
            };
            if price <= Decimal::ZERO {
                continue;
            }
            let closed = self
                .executor
                .close_position(
                    &symbol,
                    option_type,
                    quantity,
                    &strategy_name,
                    price,
                    now,
                    ExitReasonCategory::ForceExit,
                    "Force close at configured cutoff",
                )
                .await;
            match closed {
                Some(_) => info!(%symbol, "force-exit closed"),
                None => warn!(%symbol, "force-exit sweep: close failed for this symbol"),
            }
        }
    }

    fn maybe_reset_daily_counters(&mut self, now: DateTime<Utc>) {
        let today = now.with_timezone(&Kolkata).date_naive();
        if self.last_reset_date != Some(today) {
            self.daily_trade_count = 0;
            self.force_exit_done_today = false;
            self.last_reset_date = Some(today);
            info!("new trading day — counters reset");
        }
    }

    async fn persist_daily_pnl(&self, now: DateTime<Utc>) {
        let today = now.with_timezone(&Kolkata).date_naive();
        let since = today
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_local_timezone(Kolkata)
            .unwrap()
            .with_timezone(&Utc);

        for name in self.strategies.names().map(String::from).collect::<Vec<_>>() {
            let trades = match self.store.get_trades_since(&name, self.mode, since).await {
                Ok(t) => t,
                Err(e) => {
                    warn!(strategy = %name, error = %e, "daily pnl: trade lookup failed");
                    continue;
                }
            };
            let realized_pnl: Decimal = trades.iter().map(|t| t.pnl).sum();
            let fees_paid: Decimal = trades.iter().map(|t| t.fees).sum();
            let winning_trades = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count() as i64;
            let losing_trades = trades.iter().filter(|t| t.pnl < Decimal::ZERO).count() as i64;

            let unrealized_pnl: Decimal = self
                .executor
                .open_positions_raw()
                .await
                .into_iter()
                .filter(|(_, p)| p.strategy_name == name)
                .map(|(_, p)| p.unrealized_pnl)
                .sum();

            let row = tejas_schemas::DailyPnl {
                date: today,
                strategy_name: name.clone(),
                mode: self.mode,
                realized_pnl,
                unrealized_pnl,
                total_pnl: realized_pnl + unrealized_pnl,
                trades_count: trades.len() as i64,
                winning_trades,
                losing_trades,
                fees_paid,
                portfolio_value: self.executor.available_capital().await + self.executor.used_margin().await,
            };
            if let Err(e) = self.store.upsert_daily_pnl(&row).await {
                warn!(strategy = %name, error = %e, "daily pnl upsert failed");
            }
        }
    }
}
