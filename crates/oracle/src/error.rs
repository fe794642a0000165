use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OracleError {
    /// Transport or RPC failure talking to the ledger
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The wait for the ledger to finish syncing was cancelled
    #[error("ledger sync still pending")]
    SyncPending,

    /// No storage entry for the queried key
    #[error("no ledger entry for {0}")]
    NotFound(String),

    #[error("invalid committee key: {0}")]
    InvalidCommitteeKey(String),
}

impl OracleError {
    /// Whether the caller may retry the same query later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::SyncPending)
    }
}
