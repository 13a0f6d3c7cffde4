/// Kinds of failure a Broker call can produce. Transient errors are retried
/// with backoff by [`crate::retry::retry_with_backoff`]; Permanent errors
/// propagate to the caller on the first attempt.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("transient broker error: {0}")]
    Transient(String),

    #[error("permanent broker error: {0}")]
    Permanent(String),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transient(_))
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        BrokerError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        BrokerError::Permanent(msg.into())
    }

    /// Classify an HTTP status: 5xx and network-level failures are
    /// transient; everything else (401/403/invalid-token/permission-denied)
    /// is permanent.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        if status >= 500 {
            BrokerError::Transient(format!("http {status}: {}", body.into()))
        } else {
            BrokerError::Permanent(format!("http {status}: {}", body.into()))
        }
    }
}
