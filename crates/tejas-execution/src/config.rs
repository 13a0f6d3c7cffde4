use rust_decimal::Decimal;
use tejas_config::EngineConfig;
use tejas_schemas::TradingMode;

/// Execution-relevant slice of `EngineConfig`, plus the two paper-trading
/// knobs (`slippage_bps`, `fee_per_order`) that default to zero. Kept as a
/// plain struct rather than borrowing `&EngineConfig` directly so tests can
/// build one without a full config file.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub mode: TradingMode,
    pub max_positions: i64,
    pub max_position_size: Decimal,
    pub slippage_bps: i64,
    pub fee_per_order: Decimal,
}

impl ExecutorConfig {
    pub fn from_engine_config(cfg: &EngineConfig) -> Self {
        Self {
            mode: cfg.mode,
            max_positions: cfg.max_positions,
            max_position_size: cfg.max_position_size,
            slippage_bps: 0,
            fee_per_order: Decimal::ZERO,
        }
    }
}
