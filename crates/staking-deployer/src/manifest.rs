//! Deployment manifest: what a previous run already created, so a re-run
//! adopts it instead of creating it again.
//!
//! Opt-in through `manifest_path`. A manifest belongs to one cluster and one
//! payer; using it with anything else is an error.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chain_sol::{address_to_bytes, bytes_to_address, Pubkey};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::atomic::write_atomic;
use crate::error::DeployError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentManifest {
    pub cluster: String,
    pub payer: String,
    #[serde(default)]
    pub program_id: Option<String>,
    #[serde(default)]
    pub state_account: Option<String>,
    /// User address → stake account address.
    #[serde(default)]
    pub stake_accounts: BTreeMap<String, String>,
}

impl DeploymentManifest {
    pub fn new(cluster: &str, payer: &Pubkey) -> Self {
        Self {
            cluster: cluster.to_string(),
            payer: bytes_to_address(payer),
            program_id: None,
            state_account: None,
            stake_accounts: BTreeMap::new(),
        }
    }

    /// Read the manifest at `path`, or start an empty one if there is none.
    pub fn load_or_new(path: &Path, cluster: &str, payer: &Pubkey) -> Result<Self, DeployError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no manifest, starting fresh");
                return Ok(Self::new(cluster, payer));
            }
            Err(e) => return Err(DeployError::file(path, e)),
        };

        let manifest: DeploymentManifest = serde_json::from_str(&raw)
            .map_err(|e| DeployError::Manifest(format!("{}: {e}", path.display())))?;

        if manifest.cluster != cluster {
            return Err(DeployError::Manifest(format!(
                "{} was written for cluster {}, not {cluster}",
                path.display(),
                manifest.cluster
            )));
        }
        let payer = bytes_to_address(payer);
        if manifest.payer != payer {
            return Err(DeployError::Manifest(format!(
                "{} was written for payer {}, not {payer}",
                path.display(),
                manifest.payer
            )));
        }

        info!(path = %path.display(), "loaded manifest");
        Ok(manifest)
    }

    /// Atomically replace the file at `path` with this manifest.
    pub fn save(&self, path: &Path) -> Result<(), DeployError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DeployError::Manifest(format!("cannot serialize manifest: {e}")))?;

        write_atomic(path, json.as_bytes()).map_err(|e| DeployError::file(path, e))
    }

    pub fn program_id(&self) -> Result<Option<Pubkey>, DeployError> {
        parse_entry("program_id", self.program_id.as_deref())
    }

    pub fn state_account(&self) -> Result<Option<Pubkey>, DeployError> {
        parse_entry("state_account", self.state_account.as_deref())
    }

    pub fn stake_account(&self, user: &Pubkey) -> Result<Option<Pubkey>, DeployError> {
        parse_entry(
            "stake_accounts",
            self.stake_accounts.get(&bytes_to_address(user)).map(String::as_str),
        )
    }

    /// Record a freshly deployed program. Accounts created for any earlier
    /// program no longer apply.
    pub fn record_program(&mut self, program_id: &Pubkey) {
        self.program_id = Some(bytes_to_address(program_id));
        self.state_account = None;
        self.stake_accounts.clear();
    }

    /// Record a freshly initialized state account. Stake accounts tied to an
    /// earlier state account no longer apply.
    pub fn record_state_account(&mut self, state: &Pubkey) {
        self.state_account = Some(bytes_to_address(state));
        self.stake_accounts.clear();
    }

    pub fn record_stake_account(&mut self, user: &Pubkey, stake: &Pubkey) {
        self.stake_accounts
            .insert(bytes_to_address(user), bytes_to_address(stake));
    }
}

fn parse_entry(field: &str, value: Option<&str>) -> Result<Option<Pubkey>, DeployError> {
    value
        .map(|s| address_to_bytes(s).map_err(|e| DeployError::Manifest(format!("{field}: {e}"))))
        .transpose()
}
