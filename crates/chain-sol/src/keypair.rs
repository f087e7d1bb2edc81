//! Ed25519 keypairs in the Solana 64-byte secret key layout.
//!
//! A Solana "secret key" is the 32-byte Ed25519 seed followed by the 32-byte
//! public key. That is the layout written to JSON keypair files by the CLI
//! tooling, so it is the layout accepted and produced here.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::address::{bytes_to_address, Pubkey};
use crate::error::SolError;

/// Length of the serialized secret key (seed || public key).
pub const SECRET_KEY_LENGTH: usize = 64;

/// A signing identity. The address of the identity is its public key.
///
/// The inner signing key is zeroized on drop by `ed25519-dalek`.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the operating system RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from its 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Decode the 64-byte secret key layout.
    ///
    /// Fails if the slice has the wrong length or if the trailing public key
    /// does not belong to the leading seed.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, SolError> {
        let arr: Zeroizing<[u8; SECRET_KEY_LENGTH]> =
            Zeroizing::new(bytes.try_into().map_err(|_| {
                SolError::InvalidSecretKey(format!(
                    "expected {SECRET_KEY_LENGTH} bytes, got {}",
                    bytes.len()
                ))
            })?);

        let signing_key = SigningKey::from_keypair_bytes(&arr)
            .map_err(|e| SolError::InvalidSecretKey(format!("public key mismatch: {e}")))?;

        Ok(Self { signing_key })
    }

    /// The 64-byte secret key (seed || public key).
    pub fn to_secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LENGTH]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    /// The public key, which doubles as the account address.
    pub fn pubkey(&self) -> Pubkey {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Base58 address of this keypair.
    pub fn address(&self) -> String {
        bytes_to_address(&self.pubkey())
    }

    /// Sign an arbitrary message, returning the 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.address())
            .finish_non_exhaustive()
    }
}
