use thiserror::Error;

use crate::instruction::CodecError;
use crate::ledger::LedgerError;
use crate::orchestrator::Stage;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("connection error: {0}")]
    Connection(String),

    /// The payer is short and could not be topped up. A faucet refusal
    /// lands here too, with the faucet's message in `reason`.
    #[error("insufficient funds: balance {balance} lamports, required {required} lamports ({reason})")]
    InsufficientFunds {
        balance: u64,
        required: u64,
        reason: String,
    },

    /// Ledger failures are surfaced verbatim.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("encoding error: {0}")]
    Encoding(#[from] CodecError),

    #[error("file error: {path}: {reason}")]
    File { path: String, reason: String },

    #[error("keypair error: {0}")]
    Keypair(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("cannot {step} at stage {stage}")]
    OutOfOrder { step: &'static str, stage: Stage },

    #[error("transaction error: {0}")]
    Sol(#[from] chain_sol::SolError),
}

impl DeployError {
    pub(crate) fn file(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        DeployError::File {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_connection() {
        let err = DeployError::Connection("unknown cluster `moonnet`".into());
        assert_eq!(err.to_string(), "connection error: unknown cluster `moonnet`");
    }

    #[test]
    fn display_insufficient_funds() {
        let err = DeployError::InsufficientFunds {
            balance: 5,
            required: 2_000_000_000,
            reason: "no faucet configured".into(),
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: balance 5 lamports, required 2000000000 lamports (no faucet configured)"
        );
    }

    #[test]
    fn ledger_error_is_transparent() {
        let inner = LedgerError::Submission("blockhash not found".into());
        let expected = inner.to_string();
        let err: DeployError = inner.into();
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn display_file() {
        let err = DeployError::file("program.so", "not found");
        assert_eq!(err.to_string(), "file error: program.so: not found");
    }

    #[test]
    fn display_out_of_order() {
        let err = DeployError::OutOfOrder {
            step: "initialize state",
            stage: Stage::Funded,
        };
        assert_eq!(err.to_string(), "cannot initialize state at stage funded");
    }

    #[test]
    fn sol_error_converts() {
        let err: DeployError = chain_sol::SolError::SigningError("missing".into()).into();
        assert!(matches!(err, DeployError::Sol(_)));
    }

    #[test]
    fn error_trait_is_implemented() {
        let err: Box<dyn std::error::Error> = Box::new(DeployError::Config("test".into()));
        assert!(err.to_string().contains("test"));
    }
}
