//! Keypair Store: loads the deployer identity from a JSON keypair file,
//! creating one on first run.
//!
//! The file holds the 64-byte secret key as a JSON array of numbers, the same
//! format the Solana CLI writes. A missing or unreadable file is treated as
//! a first run, never as a fatal error. This is a development bootstrap key;
//! it is not meant for production custody.

use std::fs;
use std::path::Path;

use chain_sol::Keypair;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::atomic::write_atomic;
use crate::error::DeployError;

/// Load the keypair stored at `path`, generating and persisting a new one if
/// the file is missing or does not hold a valid keypair.
///
/// The generated key is written to disk before it is returned. If that write
/// fails the error is returned and the key is discarded.
pub fn load(path: impl AsRef<Path>) -> Result<Keypair, DeployError> {
    let path = path.as_ref();

    match read_keypair(path) {
        Ok(keypair) => {
            info!(path = %path.display(), pubkey = %keypair.address(), "loaded keypair");
            Ok(keypair)
        }
        Err(reason) => {
            warn!(path = %path.display(), %reason, "no usable keypair, generating a new one");
            let keypair = Keypair::generate();
            write_keypair(path, &keypair)?;
            info!(path = %path.display(), pubkey = %keypair.address(), "generated keypair");
            Ok(keypair)
        }
    }
}

/// Read a keypair file without any fallback. Used for user keypairs that
/// must already exist.
pub fn read_keypair(path: &Path) -> Result<Keypair, String> {
    let contents = Zeroizing::new(fs::read_to_string(path).map_err(|e| e.to_string())?);
    let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
        serde_json::from_str(&contents).map_err(|e| format!("not a JSON byte array: {e}"))?,
    );
    Keypair::from_secret_bytes(&bytes).map_err(|e| e.to_string())
}

/// Atomically write the keypair: temp file in the same directory, fsync,
/// then rename over `path`.
pub fn write_keypair(path: &Path, keypair: &Keypair) -> Result<(), DeployError> {
    let secret = keypair.to_secret_bytes();
    let json = Zeroizing::new(
        serde_json::to_string(secret.as_slice())
            .map_err(|e| DeployError::Keypair(format!("cannot serialize keypair: {e}")))?,
    );

    write_atomic(path, json.as_bytes())
        .map_err(|e| DeployError::Keypair(format!("cannot persist keypair to {}: {e}", path.display())))
}
