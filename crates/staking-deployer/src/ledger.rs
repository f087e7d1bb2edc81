//! Ledger Client abstraction.
//!
//! Everything the deployer needs from the network goes through
//! [`LedgerClient`]: balances, rent exemption, faucet credit and
//! submit-and-confirm. [`crate::rpc::RpcLedgerClient`] talks to a real
//! cluster; [`crate::simulated::SimulatedLedger`] executes in memory.

use std::fmt;

use chain_sol::{Keypair, Pubkey, SolInstruction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lamports in one SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

pub fn sol_to_lamports(sol: u64) -> u64 {
    sol.saturating_mul(LAMPORTS_PER_SOL)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("cannot reach ledger: {0}")]
    Connection(String),

    #[error("rpc {method} failed ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("rent exemption query failed: {0}")]
    RentQuery(String),

    #[error("airdrop failed: {0}")]
    Airdrop(String),

    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("confirmation failed: {0}")]
    Confirmation(String),

    #[error("transaction {signature} not confirmed after {waited_ms} ms")]
    ConfirmationTimeout { signature: String, waited_ms: u64 },

    #[error("transaction {signature} failed: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error("cannot sign transaction: {0}")]
    Signing(String),
}

impl From<chain_sol::SolError> for LedgerError {
    fn from(e: chain_sol::SolError) -> Self {
        LedgerError::Signing(e.to_string())
    }
}

/// How durable a read or a confirmation must be before it is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unsigned transaction: a fee payer and an ordered instruction list.
///
/// The recent blockhash is attached by the client at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub fee_payer: Pubkey,
    pub instructions: Vec<SolInstruction>,
}

impl Transaction {
    pub fn new(fee_payer: Pubkey) -> Self {
        Self {
            fee_payer,
            instructions: Vec::new(),
        }
    }

    pub fn add(mut self, instruction: SolInstruction) -> Self {
        self.instructions.push(instruction);
        self
    }
}

pub trait LedgerClient {
    /// Version string of the node. Used to check connectivity.
    fn cluster_version(&self) -> Result<String, LedgerError>;

    /// Balance in lamports.
    fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, LedgerError>;

    /// Minimum balance an account of `size` bytes must hold to be rent
    /// exempt. Depends on live network parameters; query it per account.
    fn minimum_balance_for_rent_exemption(&self, size: usize) -> Result<u64, LedgerError>;

    /// Request faucet credit and wait until it is confirmed.
    fn request_airdrop(&self, pubkey: &Pubkey, lamports: u64) -> Result<String, LedgerError>;

    /// Sign `transaction` with every signer, submit it and block until it
    /// reaches the configured commitment. Returns the transaction signature.
    ///
    /// All instructions of the transaction apply, or none do.
    fn submit_and_confirm(
        &self,
        transaction: &Transaction,
        signers: &[&Keypair],
    ) -> Result<String, LedgerError>;

    /// Balance converted to whole SOL.
    fn balance_sol(&self, pubkey: &Pubkey) -> Result<f64, LedgerError> {
        self.get_balance(pubkey).map(lamports_to_sol)
    }
}
