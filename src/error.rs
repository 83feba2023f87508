use thiserror::Error;

/// Failures of the usage tracker. None of them are fatal to the app.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to read usage record: {0:#}")]
    PersistenceLoad(anyhow::Error),

    #[error("stored usage record is corrupt: {0}")]
    CorruptRecord(#[from] serde_json::Error),

    #[error("failed to write usage record: {0:#}")]
    PersistenceWrite(anyhow::Error),

    #[error("token amount must be positive, got {0}")]
    InvalidTokenAmount(u32),

    #[error("daily message quota exhausted and no tokens left")]
    QuotaExhausted,
}
