pub mod resolver;
pub mod strategy;
pub mod supertrend;
pub mod types;

pub use resolver::{ResolvedInstrument, SymbolResolver};
pub use strategy::SupertrendReversalStrategy;
pub use types::{ExitDecision, OpenPositionSnapshot, Signal, SignalAction, Strategy};
