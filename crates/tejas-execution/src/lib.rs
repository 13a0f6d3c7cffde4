pub mod config;
pub mod error;
pub mod executor;
pub mod position_key;

pub use config::ExecutorConfig;
pub use error::{ExecutionError, RejectionReason};
pub use executor::{IntegrityReport, RecoveryReport, VirtualExecutor};
pub use position_key::{PositionKey, PositionKeyToken};
