//! System Program instructions.
//!
//! System instructions are bincode-encoded: a u32 LE variant index followed by
//! the variant's fields, little-endian, with pubkeys as raw 32 bytes.

use crate::address::{Pubkey, SYSTEM_PROGRAM_ID};
use crate::error::SolError;
use crate::transaction::{SolAccountMeta, SolInstruction};

/// System Program `CreateAccount` instruction index.
pub const SYSTEM_CREATE_ACCOUNT_IX_INDEX: u32 = 0;

/// System Program `Transfer` instruction index.
pub const SYSTEM_TRANSFER_IX_INDEX: u32 = 2;

/// Largest account data size the runtime will allocate (10 MiB).
pub const MAX_PERMITTED_DATA_LENGTH: u64 = 10 * 1024 * 1024;

/// Build a System Program `CreateAccount` instruction.
///
/// Moves `lamports` from `from` into the brand-new account `new_account`,
/// allocates `space` bytes of zeroed data and assigns it to `owner`.
/// Both `from` and `new_account` must sign.
///
/// Data layout (52 bytes):
/// `u32 index | u64 lamports | u64 space | [u8; 32] owner`
pub fn build_create_account(
    from: &Pubkey,
    new_account: &Pubkey,
    lamports: u64,
    space: u64,
    owner: &Pubkey,
) -> Result<SolInstruction, SolError> {
    if space > MAX_PERMITTED_DATA_LENGTH {
        return Err(SolError::TransactionBuildError(format!(
            "account space {space} exceeds maximum {MAX_PERMITTED_DATA_LENGTH}"
        )));
    }
    if from == new_account {
        return Err(SolError::TransactionBuildError(
            "funding account and new account must differ".into(),
        ));
    }

    let mut data = Vec::with_capacity(52);
    data.extend_from_slice(&SYSTEM_CREATE_ACCOUNT_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    data.extend_from_slice(&space.to_le_bytes());
    data.extend_from_slice(owner);

    Ok(SolInstruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable_signer(*from),
            SolAccountMeta::writable_signer(*new_account),
        ],
        data,
    })
}

/// Build a System Program `Transfer` instruction.
///
/// Data layout (12 bytes): `u32 index | u64 lamports`.
pub fn build_transfer(from: &Pubkey, to: &Pubkey, lamports: u64) -> Result<SolInstruction, SolError> {
    if lamports == 0 {
        return Err(SolError::TransactionBuildError(
            "lamports must be > 0".into(),
        ));
    }

    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    Ok(SolInstruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable_signer(*from),
            SolAccountMeta::writable(*to),
        ],
        data,
    })
}
