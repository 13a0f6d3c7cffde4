use tejas_store::StoreError;

/// Why `place_order` declined to act on a signal. Never logged as an error —
/// these are expected, routine rejections the caller simply drops.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectionReason {
    #[error("SELL has no matching open position in memory and Store")]
    SellWithoutPosition,
    #[error("max open positions reached")]
    MaxPositionsReached,
    #[error("required capital exceeds the per-position cap")]
    PositionTooLarge,
    #[error("required capital exceeds available capital")]
    InsufficientCapital,
    #[error("market price is not positive")]
    NonPositivePrice,
    #[error("symbol is blocked pending reconciliation of a prior SELL")]
    ReconciliationPending,
}

/// Failures that escape `place_order`'s "reject and return None" contract —
/// reserved for the recovery path, where a Store outage at startup really
/// should stop the process rather than silently run with an empty book.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("store error during recovery: {0}")]
    Store(#[from] StoreError),
}
