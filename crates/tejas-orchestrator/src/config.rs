use tejas_config::EngineConfig;

/// Tick-loop knobs that ride along `EngineConfig` but aren't part of its
/// recognized YAML schema — fixed constants rather than operator-tunable
/// config.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub tick_interval_seconds: u64,
    pub force_exit_hour: u32,
    pub force_exit_minute: u32,
    pub max_daily_trades: i64,
    pub daily_pnl_persist_every_n_ticks: u64,
    pub reference_symbol: String,
}

impl OrchestratorConfig {
    pub fn from_engine_config(cfg: &EngineConfig, reference_symbol: impl Into<String>) -> anyhow::Result<Self> {
        let (hour, minute) = cfg.force_exit_hm()?;
        Ok(Self {
            tick_interval_seconds: cfg.tick_interval_seconds.max(1) as u64,
            force_exit_hour: hour,
            force_exit_minute: minute,
            max_daily_trades: 100,
            daily_pnl_persist_every_n_ticks: 60,
            reference_symbol: reference_symbol.into(),
        })
    }
}
