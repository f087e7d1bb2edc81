//! Deployment configuration.
//!
//! A JSON document names the cluster, the identity, and which pipeline steps
//! to run. Steps that are not configured are not run; there is no implicit
//! behaviour toggled elsewhere.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chain_sol::{address_to_bytes, bytes_to_address, supports_write_finalize, Pubkey, BPF_LOADER_ID};
use serde::{Deserialize, Serialize};

use crate::error::DeployError;
use crate::instruction::StakingInstruction;
use crate::layout::{validate_account_size, AccountKind, DEFAULT_ACCOUNT_SIZE};
use crate::ledger::{sol_to_lamports, Commitment};

/// Loopback endpoint of a local test validator.
pub const LOCALNET_RPC: &str = "http://127.0.0.1:8899";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cluster {
    Localnet,
    Devnet,
    Testnet,
    MainnetBeta,
}

impl Cluster {
    pub fn rpc_url(self) -> &'static str {
        match self {
            Cluster::Localnet => LOCALNET_RPC,
            Cluster::Devnet => "https://api.devnet.solana.com",
            Cluster::Testnet => "https://api.testnet.solana.com",
            Cluster::MainnetBeta => "https://api.mainnet-beta.solana.com",
        }
    }

    /// Whether the cluster runs a faucet that honours `requestAirdrop`.
    pub fn has_faucet(self) -> bool {
        !matches!(self, Cluster::MainnetBeta)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cluster::Localnet => "localnet",
            Cluster::Devnet => "devnet",
            Cluster::Testnet => "testnet",
            Cluster::MainnetBeta => "mainnet-beta",
        }
    }
}

impl FromStr for Cluster {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localnet" => Ok(Cluster::Localnet),
            "devnet" => Ok(Cluster::Devnet),
            "testnet" => Ok(Cluster::Testnet),
            "mainnet-beta" => Ok(Cluster::MainnetBeta),
            other => Err(DeployError::Connection(format!("unknown cluster `{other}`"))),
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Faucet-backed funding policy for the payer.
///
/// An absent `funding` section still checks the balance; see
/// [`DeployConfig::funding_policy`]. Only `disabled: true` skips the check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FundingConfig {
    /// Balance, in whole SOL, the payer must hold before deploying.
    #[serde(default = "default_min_balance_sol")]
    pub min_balance_sol: u64,
    /// Faucet credit to request when short. `None` means no faucet.
    #[serde(default)]
    pub airdrop_sol: Option<u64>,
    #[serde(default)]
    pub disabled: bool,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            min_balance_sol: default_min_balance_sol(),
            airdrop_sol: None,
            disabled: false,
        }
    }
}

impl FundingConfig {
    pub fn min_balance_lamports(&self) -> u64 {
        sol_to_lamports(self.min_balance_sol)
    }
}

/// Airdrop requested on faucet clusters when no `funding` section is given.
pub const DEFAULT_AIRDROP_SOL: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramConfig {
    /// Compiled program bytecode (`.so`).
    pub path: PathBuf,
    /// Loader that will own the program account. Defaults to BPF loader v2;
    /// only loaders with the `Write`/`Finalize` layout are accepted.
    #[serde(default)]
    pub loader: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitializeConfig {
    /// Seconds a stake stays locked.
    pub staking_period: u64,
    /// Basis points of reward per period.
    pub reward_rate: u64,
    /// Token mint; a throwaway address is generated when absent.
    #[serde(default)]
    pub mint: Option<String>,
}

impl InitializeConfig {
    pub fn instruction(&self) -> StakingInstruction {
        StakingInstruction::Initialize {
            staking_period: self.staking_period,
            reward_rate: self.reward_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StakeAccountConfig {
    /// Keypair file of the user; the user co-signs stake account creation.
    pub user_keypair_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Overrides the endpoint resolved from `cluster`.
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub commitment: Commitment,
    #[serde(default = "default_keypair_path")]
    pub keypair_path: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    #[serde(default)]
    pub funding: Option<FundingConfig>,
    #[serde(default)]
    pub program: Option<ProgramConfig>,
    /// Already-deployed program to use instead of deploying.
    #[serde(default)]
    pub program_id: Option<String>,
    #[serde(default)]
    pub initialize: Option<InitializeConfig>,
    /// Already-initialized state account to use instead of initializing.
    #[serde(default)]
    pub state_account: Option<String>,
    #[serde(default = "default_account_size")]
    pub state_account_size: usize,
    #[serde(default = "default_account_size")]
    pub stake_account_size: usize,
    #[serde(default)]
    pub stake_accounts: Vec<StakeAccountConfig>,

    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

/// One transition of the deployment pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fund,
    DeployProgram,
    AdoptProgram,
    InitializeState,
    AdoptState,
    /// Index into `DeployConfig::stake_accounts`.
    CreateStakeAccount(usize),
}

impl DeployConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| DeployError::file(path, e))?;
        let config: DeployConfig = serde_json::from_str(&raw)
            .map_err(|e| DeployError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn cluster(&self) -> Result<Cluster, DeployError> {
        self.cluster.parse()
    }

    pub fn endpoint(&self) -> Result<String, DeployError> {
        match &self.rpc_url {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(url.clone())
            }
            Some(url) => Err(DeployError::Connection(format!("malformed rpc url `{url}`"))),
            None => Ok(self.cluster()?.rpc_url().to_string()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn loader_id(&self) -> Result<Pubkey, DeployError> {
        let loader = match self.program.as_ref().and_then(|p| p.loader.as_deref()) {
            Some(loader) => parse_pubkey("program.loader", loader)?,
            None => BPF_LOADER_ID,
        };
        if !supports_write_finalize(&loader) {
            return Err(DeployError::Config(format!(
                "program.loader: {} cannot load a program with Write/Finalize",
                bytes_to_address(&loader)
            )));
        }
        Ok(loader)
    }

    /// The balance policy `fund` applies.
    ///
    /// Without a `funding` section the payer must hold 2 SOL; faucet
    /// clusters top it up with
    /// [`DEFAULT_AIRDROP_SOL`], mainnet-beta does not. `disabled: true` is
    /// the only way to skip the check.
    pub fn funding_policy(&self) -> Result<Option<FundingConfig>, DeployError> {
        let cluster = self.cluster()?;
        Ok(match &self.funding {
            Some(funding) if funding.disabled => None,
            Some(funding) => Some(funding.clone()),
            None => Some(FundingConfig {
                airdrop_sol: cluster.has_faucet().then_some(DEFAULT_AIRDROP_SOL),
                ..FundingConfig::default()
            }),
        })
    }

    pub fn program_id(&self) -> Result<Option<Pubkey>, DeployError> {
        self.program_id
            .as_deref()
            .map(|s| parse_pubkey("program_id", s))
            .transpose()
    }

    pub fn state_account(&self) -> Result<Option<Pubkey>, DeployError> {
        self.state_account
            .as_deref()
            .map(|s| parse_pubkey("state_account", s))
            .transpose()
    }

    pub fn mint(&self) -> Result<Option<Pubkey>, DeployError> {
        self.initialize
            .as_ref()
            .and_then(|i| i.mint.as_deref())
            .map(|s| parse_pubkey("initialize.mint", s))
            .transpose()
    }

    /// Ordered list of transitions this configuration asks for.
    pub fn plan(&self) -> Vec<Step> {
        let mut steps = vec![Step::Fund];

        if self.program.is_some() {
            steps.push(Step::DeployProgram);
        } else if self.program_id.is_some() {
            steps.push(Step::AdoptProgram);
        }

        if self.initialize.is_some() {
            steps.push(Step::InitializeState);
        } else if self.state_account.is_some() {
            steps.push(Step::AdoptState);
        }

        steps.extend((0..self.stake_accounts.len()).map(Step::CreateStakeAccount));
        steps
    }

    pub fn validate(&self) -> Result<(), DeployError> {
        let cluster = self.cluster()?;
        self.endpoint()?;

        if self.confirm_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(DeployError::Config("timeouts must be non-zero".into()));
        }

        if let Some(funding) = &self.funding {
            if funding.airdrop_sol.is_some() && !cluster.has_faucet() {
                return Err(DeployError::Config(format!(
                    "{cluster} has no faucet; remove funding.airdrop_sol"
                )));
            }
            if funding.airdrop_sol == Some(0) {
                return Err(DeployError::Config("funding.airdrop_sol must be > 0".into()));
            }
            if funding.disabled && funding.airdrop_sol.is_some() {
                return Err(DeployError::Config(
                    "funding.disabled conflicts with funding.airdrop_sol".into(),
                ));
            }
        }

        let has_program = match (&self.program, &self.program_id) {
            (Some(_), Some(_)) => {
                return Err(DeployError::Config(
                    "set either `program` or `program_id`, not both".into(),
                ))
            }
            (None, None) => false,
            _ => true,
        };
        self.loader_id()?;
        self.program_id()?;

        let has_state = match (&self.initialize, &self.state_account) {
            (Some(_), Some(_)) => {
                return Err(DeployError::Config(
                    "set either `initialize` or `state_account`, not both".into(),
                ))
            }
            (None, None) => false,
            _ => true,
        };
        self.state_account()?;
        self.mint()?;

        if let Some(init) = &self.initialize {
            init.instruction().validate()?;
            validate_account_size(AccountKind::State, self.state_account_size)?;
        }

        if has_state && !has_program {
            return Err(DeployError::Config(
                "state account steps need `program` or `program_id`".into(),
            ));
        }

        if !self.stake_accounts.is_empty() {
            if !has_state {
                return Err(DeployError::Config(
                    "stake accounts need `initialize` or `state_account`".into(),
                ));
            }
            validate_account_size(AccountKind::Stake, self.stake_account_size)?;
        }

        Ok(())
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            cluster: default_cluster(),
            rpc_url: None,
            commitment: Commitment::default(),
            keypair_path: default_keypair_path(),
            request_timeout_secs: default_request_timeout_secs(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            funding: None,
            program: None,
            program_id: None,
            initialize: None,
            state_account: None,
            state_account_size: DEFAULT_ACCOUNT_SIZE,
            stake_account_size: DEFAULT_ACCOUNT_SIZE,
            stake_accounts: Vec::new(),
            manifest_path: None,
        }
    }
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey, DeployError> {
    address_to_bytes(value).map_err(|e| DeployError::Config(format!("{field}: {e}")))
}

fn default_cluster() -> String {
    Cluster::Localnet.as_str().to_string()
}

fn default_keypair_path() -> PathBuf {
    PathBuf::from("deployer-keypair.json")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_min_balance_sol() -> u64 {
    2
}

fn default_account_size() -> usize {
    DEFAULT_ACCOUNT_SIZE
}
