//! Program loader instructions.
//!
//! Loading a program is a two-phase protocol against the account created for
//! it: the bytecode is copied in with `Write { offset, bytes }` instructions
//! small enough to fit a packet, then `Finalize` marks the account executable.
//!
//! ```text
//! Write:    u32 LE 0 | u32 LE offset | u64 LE len | bytes
//! Finalize: u32 LE 1
//! ```
//!
//! This layout belongs to the non-upgradeable BPF loaders (v1 and v2), where
//! the program account itself holds the bytecode. The upgradeable loader
//! numbers its instructions differently (`InitializeBuffer = 0`,
//! `Write = 1`, ...) and deploys through a separate buffer account, so it is
//! refused here.

use crate::address::{Pubkey, BPF_LOADER_DEPRECATED_ID, BPF_LOADER_ID, SYSVAR_RENT_ID};
use crate::error::SolError;
use crate::transaction::{SolAccountMeta, SolInstruction};

/// Loader `Write` instruction index.
pub const LOADER_WRITE_IX_INDEX: u32 = 0;

/// Loader `Finalize` instruction index.
pub const LOADER_FINALIZE_IX_INDEX: u32 = 1;

/// Bytes of bytecode carried per `Write` instruction.
///
/// Leaves room in a 1232-byte packet for two signatures, three account keys,
/// the blockhash and the instruction framing.
pub const LOADER_WRITE_CHUNK: usize = 900;

/// Whether `loader` speaks the `Write`/`Finalize` layout above.
pub fn supports_write_finalize(loader: &Pubkey) -> bool {
    *loader == BPF_LOADER_ID || *loader == BPF_LOADER_DEPRECATED_ID
}

fn check_loader(loader: &Pubkey) -> Result<(), SolError> {
    if supports_write_finalize(loader) {
        Ok(())
    } else {
        Err(SolError::TransactionBuildError(format!(
            "loader {} does not use the Write/Finalize instruction layout",
            crate::address::bytes_to_address(loader)
        )))
    }
}

/// Build a loader `Write` instruction copying `bytes` to `offset` in the
/// program account. The program account must sign.
pub fn build_write(
    loader: &Pubkey,
    program: &Pubkey,
    offset: u32,
    bytes: &[u8],
) -> Result<SolInstruction, SolError> {
    check_loader(loader)?;

    let mut data = Vec::with_capacity(16 + bytes.len());
    data.extend_from_slice(&LOADER_WRITE_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&offset.to_le_bytes());
    data.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    data.extend_from_slice(bytes);

    Ok(SolInstruction {
        program_id: *loader,
        accounts: vec![SolAccountMeta::writable_signer(*program)],
        data,
    })
}

/// Build a loader `Finalize` instruction for the program account.
pub fn build_finalize(loader: &Pubkey, program: &Pubkey) -> Result<SolInstruction, SolError> {
    check_loader(loader)?;

    Ok(SolInstruction {
        program_id: *loader,
        accounts: vec![
            SolAccountMeta::writable_signer(*program),
            SolAccountMeta::readonly(SYSVAR_RENT_ID),
        ],
        data: LOADER_FINALIZE_IX_INDEX.to_le_bytes().to_vec(),
    })
}

/// Split bytecode into `(offset, chunk)` pairs of at most
/// [`LOADER_WRITE_CHUNK`] bytes.
pub fn write_chunks(bytecode: &[u8]) -> impl Iterator<Item = (u32, &[u8])> {
    bytecode
        .chunks(LOADER_WRITE_CHUNK)
        .enumerate()
        .map(|(i, chunk)| ((i * LOADER_WRITE_CHUNK) as u32, chunk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::BPF_LOADER_UPGRADEABLE_ID;
    use crate::keypair::Keypair;
    use crate::transaction::{compile_transaction, sign_transaction, PACKET_DATA_SIZE};

    #[test]
    fn write_data_layout() {
        let program = [4u8; 32];
        let ix = build_write(&BPF_LOADER_ID, &program, 900, &[0xAA; 5]).unwrap();

        assert_eq!(ix.program_id, BPF_LOADER_ID);
        assert_eq!(&ix.data[..4], &[0, 0, 0, 0]);
        assert_eq!(&ix.data[4..8], &900u32.to_le_bytes());
        assert_eq!(&ix.data[8..16], &5u64.to_le_bytes());
        assert_eq!(&ix.data[16..], &[0xAA; 5]);
        assert!(ix.accounts[0].is_signer);
    }

    #[test]
    fn finalize_references_rent_sysvar() {
        let ix = build_finalize(&BPF_LOADER_ID, &[4u8; 32]).unwrap();
        assert_eq!(ix.data, vec![1, 0, 0, 0]);
        assert_eq!(ix.accounts[1].pubkey, SYSVAR_RENT_ID);
        assert!(!ix.accounts[1].is_writable);
    }

    #[test]
    fn tags_are_the_same_for_both_legacy_loaders() {
        for loader in [BPF_LOADER_ID, BPF_LOADER_DEPRECATED_ID] {
            let write = build_write(&loader, &[4u8; 32], 0, &[1]).unwrap();
            let finalize = build_finalize(&loader, &[4u8; 32]).unwrap();
            assert_eq!(&write.data[..4], &[0, 0, 0, 0]);
            assert_eq!(finalize.data, vec![1, 0, 0, 0]);
        }
    }

    #[test]
    fn upgradeable_loader_is_refused() {
        // Tag 0 is InitializeBuffer and tag 1 is Write for this loader.
        assert!(!supports_write_finalize(&BPF_LOADER_UPGRADEABLE_ID));
        assert!(matches!(
            build_write(&BPF_LOADER_UPGRADEABLE_ID, &[4u8; 32], 0, &[1]),
            Err(SolError::TransactionBuildError(_))
        ));
        assert!(build_finalize(&BPF_LOADER_UPGRADEABLE_ID, &[4u8; 32]).is_err());
        assert!(build_write(&[9u8; 32], &[4u8; 32], 0, &[1]).is_err());
    }

    #[test]
    fn chunks_cover_bytecode_in_order() {
        let bytecode: Vec<u8> = (0..2048u32).map(|i| i as u8).collect();
        let chunks: Vec<_> = write_chunks(&bytecode).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].0, 0);
        assert_eq!(chunks[1].0, 900);
        assert_eq!(chunks[2].0, 1800);
        assert_eq!(chunks[2].1.len(), 248);

        let rebuilt: Vec<u8> = chunks.iter().flat_map(|(_, c)| c.iter().copied()).collect();
        assert_eq!(rebuilt, bytecode);
    }

    #[test]
    fn full_write_transaction_fits_in_a_packet() {
        let payer = Keypair::from_seed(&[1u8; 32]);
        let program = Keypair::from_seed(&[2u8; 32]);
        let ix = build_write(&BPF_LOADER_ID, &program.pubkey(), 0, &[0xFF; LOADER_WRITE_CHUNK]).unwrap();
        let tx = compile_transaction(&[ix], &payer.pubkey(), &[9u8; 32]).unwrap();
        let signed = sign_transaction(&tx, &[&payer, &program]).unwrap();
        assert!(signed.wire.len() <= PACKET_DATA_SIZE);
    }
}
