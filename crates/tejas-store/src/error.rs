#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(#[source] sqlx::Error),

    #[error("store validation rejected: {0}")]
    Validation(String),

    #[error("row not found")]
    NotFound,
}

impl StoreError {
    /// Classify a raw sqlx error: connection/pool/io failures are
    /// transient and retried; a constraint
    /// violation (bad foreign key, check failure) is a schema/validation
    /// rejection and must not be retried.
    pub fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Transient(err)
            }
            sqlx::Error::Database(db_err) => {
                StoreError::Validation(db_err.message().to_string())
            }
            sqlx::Error::RowNotFound => StoreError::NotFound,
            _ => StoreError::Transient(err),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}
