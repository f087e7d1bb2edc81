//! Solana addresses and well-known program IDs.
//!
//! Solana addresses are simply Base58-encoded 32-byte Ed25519 public keys.
//! There is no hashing step: the public key bytes ARE the address bytes.

use crate::error::SolError;

/// A 32-byte account address.
pub type Pubkey = [u8; 32];

/// The System Program: 32 zero bytes.
/// Base58: `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = [0u8; 32];

/// Upgradeable BPF loader: `BPFLoaderUpgradeab1e11111111111111111111111`
pub const BPF_LOADER_UPGRADEABLE_ID: Pubkey = [
    0x02, 0xa8, 0xf6, 0x91, 0x4e, 0x88, 0xa1, 0xb0, 0xe2, 0x10, 0x15, 0x3e, 0xf7, 0x63, 0xae,
    0x2b, 0x00, 0xc2, 0xb9, 0x3d, 0x16, 0xc1, 0x24, 0xd2, 0xc0, 0x53, 0x7a, 0x10, 0x04, 0x80,
    0x00, 0x00,
];

/// BPF loader v2: `BPFLoader2111111111111111111111111111111111`
pub const BPF_LOADER_ID: Pubkey = [
    0x02, 0xa8, 0xf6, 0x91, 0x4e, 0x88, 0xa1, 0x6e, 0x39, 0x5a, 0xe1, 0x28, 0x94, 0x8f, 0xfa,
    0x69, 0x56, 0x93, 0x37, 0x68, 0x18, 0xdd, 0x47, 0x43, 0x52, 0x21, 0xf3, 0xc6, 0x00, 0x00,
    0x00, 0x00,
];

/// BPF loader v1: `BPFLoader1111111111111111111111111111111111`
pub const BPF_LOADER_DEPRECATED_ID: Pubkey = [
    0x02, 0xa8, 0xf6, 0x91, 0x4e, 0x88, 0xa1, 0x6b, 0xbd, 0x23, 0x95, 0x85, 0x5f, 0x64, 0x04,
    0xd9, 0xb4, 0xf4, 0x56, 0xb7, 0x82, 0x1b, 0xb0, 0x14, 0x57, 0x49, 0x42, 0x8c, 0x00, 0x00,
    0x00, 0x00,
];

/// Rent sysvar: `SysvarRent111111111111111111111111111111111`
pub const SYSVAR_RENT_ID: Pubkey = [
    0x06, 0xa7, 0xd5, 0x17, 0x19, 0x2c, 0x5c, 0x51, 0x21, 0x8c, 0xc9, 0x4c, 0x3d, 0x4a, 0xf1,
    0x7f, 0x58, 0xda, 0xee, 0x08, 0x9b, 0xa1, 0xfd, 0x44, 0xe3, 0xdb, 0xd9, 0x8a, 0x00, 0x00,
    0x00, 0x00,
];

/// Validate a Solana address string.
///
/// A valid address is a Base58 string that decodes to exactly 32 bytes.
pub fn validate_address(address: &str) -> Result<bool, SolError> {
    address_to_bytes(address).map(|_| true)
}

/// Decode a Solana address string to its 32-byte representation.
pub fn address_to_bytes(address: &str) -> Result<Pubkey, SolError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| SolError::InvalidAddress(format!("base58 decode failed: {e}")))?;

    let arr: Pubkey = bytes.try_into().map_err(|v: Vec<u8>| {
        SolError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
    })?;

    Ok(arr)
}

/// Encode 32 bytes as a Solana address (Base58 string).
pub fn bytes_to_address(bytes: &Pubkey) -> String {
    bs58::encode(bytes).into_string()
}
