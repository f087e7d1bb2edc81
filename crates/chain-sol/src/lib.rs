//! Solana ledger primitives for the staking deployer.
//!
//! This crate handles addresses, Ed25519 keypairs, System Program and
//! program-loader instructions, and the compact transaction wire format.
//! Like the rest of the workspace it does not pull in `solana-sdk`; the wire
//! format is implemented by hand, using `ed25519-dalek` for signing and `bs58`
//! for Base58 encoding.

pub mod address;
pub mod error;
pub mod keypair;
pub mod loader;
pub mod system;
pub mod transaction;

// Re-export key public types for ergonomic imports.
pub use address::{
    address_to_bytes, bytes_to_address, validate_address, Pubkey, BPF_LOADER_DEPRECATED_ID,
    BPF_LOADER_ID, BPF_LOADER_UPGRADEABLE_ID, SYSTEM_PROGRAM_ID, SYSVAR_RENT_ID,
};
pub use error::SolError;
pub use keypair::Keypair;
pub use loader::{
    build_finalize, build_write, supports_write_finalize, write_chunks, LOADER_WRITE_CHUNK,
};
pub use system::{build_create_account, build_transfer, MAX_PERMITTED_DATA_LENGTH};
pub use transaction::{
    compile_transaction, encode_compact_u16, serialize_message, sign_transaction,
    CompiledInstruction, SignedTransaction, SolAccountMeta, SolInstruction, SolTransaction,
    PACKET_DATA_SIZE,
};
