use uuid::Uuid;

/// In-memory key for an open position: a fresh BUY gets a disciplined
/// incrementing sequence number (see `VirtualExecutor::next_key`), and a
/// position reconstructed from the Store at startup is keyed off the row's
/// own id, which is why two recovery runs against the same Store state
/// produce the same map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub symbol: String,
    pub token: PositionKeyToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionKeyToken {
    Sequence(u64),
    Recovered(Uuid),
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.token {
            PositionKeyToken::Sequence(n) => write!(f, "{}#{n}", self.symbol),
            PositionKeyToken::Recovered(id) => write!(f, "{}#recovered:{id}", self.symbol),
        }
    }
}
