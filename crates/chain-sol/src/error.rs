use thiserror::Error;

/// Solana ledger primitive errors.
#[derive(Debug, Error)]
pub enum SolError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}
