use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tejas_schemas::{Candle, OptionType, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    BuyCall,
    BuyPut,
    SellCall,
    SellPut,
}

impl SignalAction {
    pub fn option_type(self) -> OptionType {
        match self {
            SignalAction::BuyCall | SignalAction::SellCall => OptionType::Ce,
            SignalAction::BuyPut | SignalAction::SellPut => OptionType::Pe,
        }
    }

    pub fn is_entry(self) -> bool {
        matches!(self, SignalAction::BuyCall | SignalAction::BuyPut)
    }
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub action: SignalAction,
    pub symbol: String,
    pub quantity: i64,
    pub metadata: serde_json::Value,
}

/// Read-only view of a strategy's own open positions, passed into
/// `generate_signals` by the orchestrator instead of giving strategies a
/// back-reference to the executor.
#[derive(Debug, Clone, Default)]
pub struct OpenPositionSnapshot {
    pub by_symbol: HashMap<String, OptionType>,
}

impl OpenPositionSnapshot {
    pub fn has_open_call(&self) -> bool {
        self.by_symbol.values().any(|t| *t == OptionType::Ce)
    }

    pub fn has_open_put(&self) -> bool {
        self.by_symbol.values().any(|t| *t == OptionType::Pe)
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ExitDecision {
    pub should_exit: bool,
    pub category: Option<tejas_schemas::ExitReasonCategory>,
    pub reason: String,
}

impl ExitDecision {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            should_exit: false,
            category: None,
            reason: reason.into(),
        }
    }

    pub fn exit(category: tejas_schemas::ExitReasonCategory, reason: impl Into<String>) -> Self {
        Self {
            should_exit: true,
            category: Some(category),
            reason: reason.into(),
        }
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Ingest a candle series; filters to closed candles and appends only
    /// genuinely newer ones to an internal bounded buffer, recomputing
    /// indicator state and setting a new-candle-arrived flag.
    fn update_market_data(&mut self, candles: &[Candle], now: DateTime<Utc>);

    /// Entries emitted only when a new candle just arrived (then cleared);
    /// exits evaluated every call against `open_positions`' per-symbol exit
    /// checks are handled separately via `should_exit` — this only covers
    /// the trend-flip entry trigger and its cooldown/anti-hedging gates.
    fn generate_signals(
        &mut self,
        now: DateTime<Utc>,
        spot: Option<rust_decimal::Decimal>,
        open_positions: &OpenPositionSnapshot,
    ) -> Vec<Signal>;

    fn should_exit(
        &self,
        position: &Position,
        current_price: rust_decimal::Decimal,
        now: DateTime<Utc>,
    ) -> ExitDecision;
}
