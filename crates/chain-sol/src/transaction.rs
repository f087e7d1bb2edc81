//! Manual Solana transaction wire format and multi-signer signing.
//!
//! We build Solana transactions entirely by hand, without a `solana-sdk` dependency.
//! The wire format is a compact binary layout documented here:
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```

use crate::address::{bytes_to_address, Pubkey};
use crate::error::SolError;
use crate::keypair::Keypair;

/// Maximum size of a serialized transaction accepted by the network.
pub const PACKET_DATA_SIZE: usize = 1232;

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in Solana's compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single account reference in a Solana instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolAccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl SolAccountMeta {
    pub fn writable_signer(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            is_signer: true,
            is_writable: true,
        }
    }

    pub fn readonly_signer(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            is_signer: true,
            is_writable: false,
        }
    }

    pub fn writable(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            is_signer: false,
            is_writable: false,
        }
    }
}

/// A Solana instruction (before it is compiled into a transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<SolAccountMeta>,
    pub data: Vec<u8>,
}

/// A compiled, unsigned Solana transaction message.
#[derive(Debug, Clone)]
pub struct SolTransaction {
    /// All account keys referenced by this transaction, in canonical order:
    ///   1. writable signers (fee payer first)
    ///   2. read-only signers
    ///   3. writable non-signers
    ///   4. read-only non-signers
    pub account_keys: Vec<Pubkey>,

    /// Number of required signatures (first N accounts are signers).
    pub num_required_signatures: u8,
    /// How many of the signing accounts are read-only.
    pub num_readonly_signed: u8,
    /// How many of the non-signing accounts are read-only.
    pub num_readonly_unsigned: u8,

    pub recent_blockhash: [u8; 32],

    /// Compiled instructions (account references replaced with indices).
    pub compiled_instructions: Vec<CompiledInstruction>,
}

impl SolTransaction {
    /// The accounts whose signatures this transaction requires, in slot order.
    pub fn required_signers(&self) -> &[Pubkey] {
        &self.account_keys[..self.num_required_signatures as usize]
    }
}

/// A compiled instruction where account references are replaced by u8 indices
/// into the transaction's `account_keys` array.
#[derive(Debug, Clone)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// A fully signed transaction ready for submission.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// One signature per required signer, in account-key order.
    pub signatures: Vec<[u8; 64]>,
    /// Serialized wire bytes (`sendTransaction` payload).
    pub wire: Vec<u8>,
}

impl SignedTransaction {
    /// The transaction id: Base58 of the fee payer's signature.
    pub fn id(&self) -> String {
        self.signatures
            .first()
            .map(|sig| bs58::encode(sig).into_string())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Transaction building
// ---------------------------------------------------------------------------

/// Build a transaction message from a set of instructions with a single fee
/// payer.
///
/// The fee payer is always the first signer and is placed at index 0 in the
/// account keys. Duplicate account references are merged, keeping the most
/// permissive signer/writable flags.
pub fn compile_transaction(
    instructions: &[SolInstruction],
    fee_payer: &Pubkey,
    recent_blockhash: &[u8; 32],
) -> Result<SolTransaction, SolError> {
    if instructions.is_empty() {
        return Err(SolError::TransactionBuildError(
            "transaction has no instructions".into(),
        ));
    }

    // Instruction account lists are tiny, a Vec scan beats a map here.
    struct AccountEntry {
        pubkey: Pubkey,
        is_signer: bool,
        is_writable: bool,
    }

    let mut entries: Vec<AccountEntry> = Vec::new();

    let mut upsert = |pubkey: Pubkey, signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
            entry.is_signer |= signer;
            entry.is_writable |= writable;
        } else {
            entries.push(AccountEntry {
                pubkey,
                is_signer: signer,
                is_writable: writable,
            });
        }
    };

    // Fee payer is always signer + writable, inserted first so the stable
    // sort below keeps it at index 0.
    upsert(*fee_payer, true, true);

    for ix in instructions {
        for meta in &ix.accounts {
            upsert(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        // Program IDs are non-signer, read-only accounts.
        upsert(ix.program_id, false, false);
    }

    entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    });

    if entries.len() > u8::MAX as usize {
        return Err(SolError::TransactionBuildError(format!(
            "too many accounts: {}",
            entries.len()
        )));
    }

    let num_signers = entries.iter().filter(|e| e.is_signer).count() as u8;
    let num_readonly_signed = entries
        .iter()
        .filter(|e| e.is_signer && !e.is_writable)
        .count() as u8;
    let num_readonly_unsigned = entries
        .iter()
        .filter(|e| !e.is_signer && !e.is_writable)
        .count() as u8;

    let account_keys: Vec<Pubkey> = entries.iter().map(|e| e.pubkey).collect();

    let index_of = |key: &Pubkey| -> Result<u8, SolError> {
        account_keys
            .iter()
            .position(|k| k == key)
            .map(|i| i as u8)
            .ok_or_else(|| {
                SolError::TransactionBuildError(format!(
                    "account {} not in account keys",
                    bytes_to_address(key)
                ))
            })
    };

    let mut compiled = Vec::with_capacity(instructions.len());
    for ix in instructions {
        let program_id_index = index_of(&ix.program_id)?;
        let account_indices = ix
            .accounts
            .iter()
            .map(|meta| index_of(&meta.pubkey))
            .collect::<Result<Vec<u8>, SolError>>()?;

        compiled.push(CompiledInstruction {
            program_id_index,
            account_indices,
            data: ix.data.clone(),
        });
    }

    Ok(SolTransaction {
        account_keys,
        num_required_signatures: num_signers,
        num_readonly_signed,
        num_readonly_unsigned,
        recent_blockhash: *recent_blockhash,
        compiled_instructions: compiled,
    })
}

/// Serialize the transaction message (the bytes that get signed).
pub fn serialize_message(tx: &SolTransaction) -> Result<Vec<u8>, SolError> {
    let mut buf = Vec::with_capacity(256);

    buf.push(tx.num_required_signatures);
    buf.push(tx.num_readonly_signed);
    buf.push(tx.num_readonly_unsigned);

    buf.extend_from_slice(&encode_compact_u16(tx.account_keys.len() as u16));
    for key in &tx.account_keys {
        buf.extend_from_slice(key);
    }

    buf.extend_from_slice(&tx.recent_blockhash);

    buf.extend_from_slice(&encode_compact_u16(
        tx.compiled_instructions.len() as u16
    ));
    for ix in &tx.compiled_instructions {
        let data_len = u16::try_from(ix.data.len()).map_err(|_| {
            SolError::SerializationError(format!(
                "instruction data of {} bytes does not fit compact-u16",
                ix.data.len()
            ))
        })?;

        buf.push(ix.program_id_index);
        buf.extend_from_slice(&encode_compact_u16(ix.account_indices.len() as u16));
        buf.extend_from_slice(&ix.account_indices);
        buf.extend_from_slice(&encode_compact_u16(data_len));
        buf.extend_from_slice(&ix.data);
    }

    Ok(buf)
}

/// Sign a compiled transaction with every required signer and serialize it.
///
/// `signers` must cover every account in the signer section of the message,
/// and must not contain keys the message does not ask for. Signature slots
/// are filled in account-key order regardless of the order of `signers`.
pub fn sign_transaction(
    tx: &SolTransaction,
    signers: &[&Keypair],
) -> Result<SignedTransaction, SolError> {
    let required = tx.required_signers();

    if let Some(extra) = signers
        .iter()
        .find(|kp| !required.contains(&kp.pubkey()))
    {
        return Err(SolError::SigningError(format!(
            "unknown signer {}",
            extra.address()
        )));
    }

    let message_bytes = serialize_message(tx)?;

    let mut signatures = Vec::with_capacity(required.len());
    for key in required {
        let signer = signers.iter().find(|kp| kp.pubkey() == *key).ok_or_else(|| {
            SolError::SigningError(format!("missing signature for {}", bytes_to_address(key)))
        })?;
        signatures.push(signer.sign(&message_bytes));
    }

    let mut wire = Vec::with_capacity(3 + 64 * signatures.len() + message_bytes.len());
    wire.extend_from_slice(&encode_compact_u16(signatures.len() as u16));
    for sig in &signatures {
        wire.extend_from_slice(sig);
    }
    wire.extend_from_slice(&message_bytes);

    if wire.len() > PACKET_DATA_SIZE {
        return Err(SolError::SerializationError(format!(
            "transaction too large: {} > {PACKET_DATA_SIZE} bytes",
            wire.len()
        )));
    }

    Ok(SignedTransaction { signatures, wire })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::SYSTEM_PROGRAM_ID;
    use crate::system::{build_create_account, build_transfer};

    // -- compact-u16 encoding -----------------------------------------------

    #[test]
    fn compact_u16_zero() {
        assert_eq!(encode_compact_u16(0), vec![0x00]);
    }

    #[test]
    fn compact_u16_one_byte_max() {
        assert_eq!(encode_compact_u16(0x7f), vec![0x7f]);
    }

    #[test]
    fn compact_u16_boundary_128() {
        // 128 = 0x80 -> two bytes: (0x00 | 0x80), 0x01
        assert_eq!(encode_compact_u16(128), vec![0x80, 0x01]);
    }

    #[test]
    fn compact_u16_boundary_16384() {
        assert_eq!(encode_compact_u16(16384), vec![0x80, 0x80, 0x01]);
    }

    #[test]
    fn compact_u16_max_value() {
        assert_eq!(encode_compact_u16(u16::MAX), vec![0xff, 0xff, 0x03]);
    }

    // -- compilation --------------------------------------------------------

    fn create_then_call(payer: &Pubkey, new_account: &Pubkey, program: &Pubkey) -> Vec<SolInstruction> {
        vec![
            build_create_account(payer, new_account, 10, 1000, program).unwrap(),
            SolInstruction {
                program_id: *program,
                accounts: vec![
                    SolAccountMeta::writable(*new_account),
                    SolAccountMeta::readonly_signer(*payer),
                    SolAccountMeta::readonly(SYSTEM_PROGRAM_ID),
                ],
                data: vec![0],
            },
        ]
    }

    #[test]
    fn empty_instruction_list_is_rejected() {
        assert!(compile_transaction(&[], &[1u8; 32], &[0u8; 32]).is_err());
    }

    #[test]
    fn fee_payer_is_first_account() {
        let payer = [1u8; 32];
        let to = [2u8; 32];
        let ix = build_transfer(&to, &payer, 5).unwrap();
        // `to` appears as signer in the instruction but payer still leads.
        let tx = compile_transaction(&[ix], &payer, &[0u8; 32]).unwrap();
        assert_eq!(tx.account_keys[0], payer);
        assert_eq!(tx.num_required_signatures, 2);
    }

    #[test]
    fn duplicate_accounts_are_merged_with_widest_flags() {
        let payer = [1u8; 32];
        let new_account = [2u8; 32];
        let program = [3u8; 32];
        let tx = compile_transaction(
            &create_then_call(&payer, &new_account, &program),
            &payer,
            &[0u8; 32],
        )
        .unwrap();

        // payer, new_account (signers), then system program and program (read-only).
        assert_eq!(tx.account_keys.len(), 4);
        assert_eq!(tx.required_signers(), &[payer, new_account]);
        assert_eq!(tx.num_readonly_signed, 0);
        assert_eq!(tx.num_readonly_unsigned, 2);
        assert_eq!(tx.compiled_instructions.len(), 2);
    }

    #[test]
    fn compiled_instruction_indices_point_at_keys() {
        let payer = [1u8; 32];
        let new_account = [2u8; 32];
        let program = [3u8; 32];
        let tx = compile_transaction(
            &create_then_call(&payer, &new_account, &program),
            &payer,
            &[0u8; 32],
        )
        .unwrap();

        let call = &tx.compiled_instructions[1];
        assert_eq!(tx.account_keys[call.program_id_index as usize], program);
        assert_eq!(tx.account_keys[call.account_indices[0] as usize], new_account);
        assert_eq!(tx.account_keys[call.account_indices[1] as usize], payer);
    }

    #[test]
    fn message_contains_blockhash_after_keys() {
        let payer = [1u8; 32];
        let blockhash = [0xCCu8; 32];
        let ix = build_transfer(&payer, &[2u8; 32], 500).unwrap();
        let tx = compile_transaction(&[ix], &payer, &blockhash).unwrap();
        let msg = serialize_message(&tx).unwrap();

        assert_eq!(msg[0], tx.num_required_signatures);
        let offset = 3 + 1 + 32 * tx.account_keys.len();
        assert_eq!(&msg[offset..offset + 32], &blockhash);
    }

    // -- signing ------------------------------------------------------------

    #[test]
    fn multi_signer_signatures_verify_in_key_order() {
        use ed25519_dalek::{Signature, VerifyingKey};

        let payer = Keypair::from_seed(&[0x42u8; 32]);
        let new_account = Keypair::from_seed(&[0x43u8; 32]);
        let program = [7u8; 32];
        let tx = compile_transaction(
            &create_then_call(&payer.pubkey(), &new_account.pubkey(), &program),
            &payer.pubkey(),
            &[0x99u8; 32],
        )
        .unwrap();

        // Signers passed in reverse order; slots still follow key order.
        let signed = sign_transaction(&tx, &[&new_account, &payer]).unwrap();
        assert_eq!(signed.signatures.len(), 2);
        assert_eq!(signed.wire[0], 0x02);

        let message = serialize_message(&tx).unwrap();
        for (key, sig) in tx.required_signers().iter().zip(&signed.signatures) {
            let vk = VerifyingKey::from_bytes(key).unwrap();
            assert!(vk
                .verify_strict(&message, &Signature::from_bytes(sig))
                .is_ok());
        }
        assert_eq!(&signed.wire[1 + 128..], message.as_slice());
    }

    #[test]
    fn missing_signer_fails() {
        let payer = Keypair::from_seed(&[1u8; 32]);
        let new_account = Keypair::from_seed(&[2u8; 32]);
        let tx = compile_transaction(
            &create_then_call(&payer.pubkey(), &new_account.pubkey(), &[7u8; 32]),
            &payer.pubkey(),
            &[0u8; 32],
        )
        .unwrap();

        let err = sign_transaction(&tx, &[&payer]).unwrap_err();
        assert!(err.to_string().contains("missing signature"));
    }

    #[test]
    fn unknown_signer_fails() {
        let payer = Keypair::from_seed(&[1u8; 32]);
        let stranger = Keypair::from_seed(&[3u8; 32]);
        let ix = build_transfer(&payer.pubkey(), &[2u8; 32], 1).unwrap();
        let tx = compile_transaction(&[ix], &payer.pubkey(), &[0u8; 32]).unwrap();

        let err = sign_transaction(&tx, &[&payer, &stranger]).unwrap_err();
        assert!(err.to_string().contains("unknown signer"));
    }

    #[test]
    fn transaction_id_is_fee_payer_signature() {
        let payer = Keypair::from_seed(&[5u8; 32]);
        let ix = build_transfer(&payer.pubkey(), &[2u8; 32], 1).unwrap();
        let tx = compile_transaction(&[ix], &payer.pubkey(), &[0u8; 32]).unwrap();
        let signed = sign_transaction(&tx, &[&payer]).unwrap();

        assert_eq!(signed.id(), bs58::encode(signed.signatures[0]).into_string());
    }

    #[test]
    fn oversized_transaction_is_rejected() {
        let payer = Keypair::from_seed(&[5u8; 32]);
        let ix = SolInstruction {
            program_id: [9u8; 32],
            accounts: vec![],
            data: vec![0u8; PACKET_DATA_SIZE],
        };
        let tx = compile_transaction(&[ix], &payer.pubkey(), &[0u8; 32]).unwrap();
        let err = sign_transaction(&tx, &[&payer]).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
