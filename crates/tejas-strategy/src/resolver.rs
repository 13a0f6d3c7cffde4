use tejas_schemas::OptionType;

/// The tradable symbol and lot size for a strike come from the broker's
/// instrument master, never generated by the strategy itself. The
/// orchestrator wires a concrete resolver backed by the loaded instrument
/// master at startup.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, strike: i64, option_type: OptionType) -> Option<ResolvedInstrument>;
}

#[derive(Debug, Clone)]
pub struct ResolvedInstrument {
    pub symbol: String,
    pub lot_size: i64,
}
