//! Deployment Orchestrator.
//!
//! Drives the deployment as a strict sequence of stages:
//!
//! ```text
//! Disconnected → Connected → Funded → ProgramDeployed → StateInitialized → (StakeAccountCreated)*
//! ```
//!
//! Every step checks the stage it needs before touching the ledger. A failed
//! step leaves the stage where it was; nothing is retried.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use chain_sol::{
    build_create_account, build_finalize, build_write, bytes_to_address, write_chunks, Keypair,
    Pubkey, SolAccountMeta, BPF_LOADER_ID, SYSTEM_PROGRAM_ID,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{DeployConfig, FundingConfig, Step};
use crate::error::DeployError;
use crate::instruction::StakingInstruction;
use crate::keystore;
use crate::layout::DEFAULT_ACCOUNT_SIZE;
use crate::ledger::{lamports_to_sol, sol_to_lamports, LedgerClient, LedgerError, Transaction};
use crate::manifest::DeploymentManifest;
use crate::provisioner::{create_and_initialize, DomainCall, ProvisionedAccount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Disconnected,
    Connected,
    Funded,
    ProgramDeployed,
    StateInitialized,
    StakeAccountCreated,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Disconnected => "disconnected",
            Stage::Connected => "connected",
            Stage::Funded => "funded",
            Stage::ProgramDeployed => "program_deployed",
            Stage::StateInitialized => "state_initialized",
            Stage::StakeAccountCreated => "stake_account_created",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Orchestrator<'a, L: LedgerClient + ?Sized> {
    ledger: &'a L,
    payer: &'a Keypair,
    funding: Option<FundingConfig>,
    loader: Pubkey,
    state_account_size: usize,
    stake_account_size: usize,
    stage: Cell<Stage>,
    program_id: Option<Pubkey>,
    state_account: Option<Pubkey>,
}

impl<'a, L: LedgerClient + ?Sized> Orchestrator<'a, L> {
    pub fn new(ledger: &'a L, payer: &'a Keypair) -> Self {
        Self {
            ledger,
            payer,
            funding: None,
            loader: BPF_LOADER_ID,
            state_account_size: DEFAULT_ACCOUNT_SIZE,
            stake_account_size: DEFAULT_ACCOUNT_SIZE,
            stage: Cell::new(Stage::Disconnected),
            program_id: None,
            state_account: None,
        }
    }

    pub fn with_funding(mut self, funding: Option<FundingConfig>) -> Self {
        self.funding = funding;
        self
    }

    pub fn with_loader(mut self, loader: Pubkey) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_account_sizes(mut self, state: usize, stake: usize) -> Self {
        self.state_account_size = state;
        self.stake_account_size = stake;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage.get()
    }

    pub fn program_id(&self) -> Option<Pubkey> {
        self.program_id
    }

    pub fn state_account(&self) -> Option<Pubkey> {
        self.state_account
    }

    fn require(&self, step: &'static str, ok: impl FnOnce(Stage) -> bool) -> Result<(), DeployError> {
        let stage = self.stage.get();
        if ok(stage) {
            Ok(())
        } else {
            Err(DeployError::OutOfOrder { step, stage })
        }
    }

    fn advance(&self, to: Stage) {
        debug!(from = %self.stage.get(), %to, "stage transition");
        self.stage.set(to);
    }

    /// Check that the ledger answers. Returns the node version.
    pub fn connect(&mut self) -> Result<String, DeployError> {
        self.require("connect", |s| s == Stage::Disconnected)?;
        let version = self
            .ledger
            .cluster_version()
            .map_err(|e| DeployError::Connection(e.to_string()))?;
        info!(%version, "connected");
        self.advance(Stage::Connected);
        Ok(version)
    }

    /// Make sure the payer can pay for the deployment. Returns the payer
    /// balance in lamports, or `None` when funding is disabled and the
    /// balance was not checked.
    ///
    /// A payer that stays short, including because the faucet refused the
    /// airdrop, is [`DeployError::InsufficientFunds`]. Other ledger errors
    /// are returned unchanged.
    pub fn fund(&mut self) -> Result<Option<u64>, DeployError> {
        self.require("fund", |s| s == Stage::Connected)?;

        let Some(funding) = self.funding.clone() else {
            info!("funding disabled by configuration, skipping balance check");
            self.advance(Stage::Funded);
            return Ok(None);
        };

        let payer = self.payer.pubkey();
        let required = funding.min_balance_lamports();
        let mut balance = self.ledger.get_balance(&payer)?;
        info!(balance_sol = lamports_to_sol(balance), "payer balance");

        if balance < required {
            let Some(airdrop_sol) = funding.airdrop_sol else {
                return Err(DeployError::InsufficientFunds {
                    balance,
                    required,
                    reason: "no faucet configured".into(),
                });
            };
            info!(airdrop_sol, "requesting airdrop");
            match self.ledger.request_airdrop(&payer, sol_to_lamports(airdrop_sol)) {
                Ok(_) => {}
                Err(LedgerError::Airdrop(refusal)) => {
                    warn!(%refusal, "faucet refused airdrop");
                    return Err(DeployError::InsufficientFunds {
                        balance,
                        required,
                        reason: format!("faucet refused airdrop: {refusal}"),
                    });
                }
                Err(e) => return Err(e.into()),
            }
            balance = self.ledger.get_balance(&payer)?;
            if balance < required {
                return Err(DeployError::InsufficientFunds {
                    balance,
                    required,
                    reason: format!("airdrop of {airdrop_sol} SOL was not enough"),
                });
            }
            info!(balance_sol = lamports_to_sol(balance), "payer funded");
        }

        self.advance(Stage::Funded);
        Ok(Some(balance))
    }

    /// Create the program account and load `bytecode` into it. Returns the
    /// program id.
    ///
    /// The account is sized to the bytecode, funded to exactly its
    /// rent-exempt minimum and owned by the loader. The bytecode goes in as
    /// a series of `Write` transactions followed by `Finalize`.
    pub fn deploy_program(&mut self, bytecode: &[u8]) -> Result<Pubkey, DeployError> {
        self.require("deploy program", |s| s == Stage::Funded)?;
        if bytecode.is_empty() {
            return Err(DeployError::Config("program bytecode is empty".into()));
        }

        let payer = self.payer;
        let program = Keypair::generate();
        let program_id = program.pubkey();
        let signers = [payer, &program];

        let rent = self.ledger.minimum_balance_for_rent_exemption(bytecode.len())?;
        let create = build_create_account(
            &payer.pubkey(),
            &program_id,
            rent,
            bytecode.len() as u64,
            &self.loader,
        )?;
        let signature = self
            .ledger
            .submit_and_confirm(&Transaction::new(payer.pubkey()).add(create), &signers)?;
        info!(
            program_id = %program.address(),
            %signature,
            rent_lamports = rent,
            size = bytecode.len(),
            "program account created"
        );

        let mut writes = 0usize;
        for (offset, chunk) in write_chunks(bytecode) {
            let write = build_write(&self.loader, &program_id, offset, chunk)?;
            let signature = self
                .ledger
                .submit_and_confirm(&Transaction::new(payer.pubkey()).add(write), &signers)?;
            debug!(offset, len = chunk.len(), %signature, "bytecode chunk written");
            writes += 1;
        }

        let finalize = build_finalize(&self.loader, &program_id)?;
        let signature = self
            .ledger
            .submit_and_confirm(&Transaction::new(payer.pubkey()).add(finalize), &signers)?;
        info!(program_id = %program.address(), %signature, writes, "program deployed");

        self.program_id = Some(program_id);
        self.advance(Stage::ProgramDeployed);
        Ok(program_id)
    }

    /// Use a program deployed earlier.
    pub fn adopt_program(&mut self, program_id: Pubkey) -> Result<(), DeployError> {
        self.require("adopt program", |s| s == Stage::Funded)?;
        info!(program_id = %bytes_to_address(&program_id), "using existing program");
        self.program_id = Some(program_id);
        self.advance(Stage::ProgramDeployed);
        Ok(())
    }

    /// Create and initialize the global state account. Without a `mint`, a
    /// throwaway address is generated.
    pub fn initialize_state(
        &mut self,
        staking_period: u64,
        reward_rate: u64,
        mint: Option<Pubkey>,
    ) -> Result<ProvisionedAccount, DeployError> {
        self.require("initialize state", |s| s == Stage::ProgramDeployed)?;
        let program_id = self.deployed_program("initialize state")?;

        let mint = match mint {
            Some(mint) => mint,
            None => {
                let mint = Keypair::generate().pubkey();
                warn!(mint = %bytes_to_address(&mint), "no mint configured, using a throwaway address");
                mint
            }
        };

        let call = DomainCall {
            instruction: StakingInstruction::Initialize {
                staking_period,
                reward_rate,
            },
            accounts: vec![
                SolAccountMeta::readonly(mint),
                SolAccountMeta::readonly_signer(self.payer.pubkey()),
                SolAccountMeta::readonly(SYSTEM_PROGRAM_ID),
            ],
        };
        let state = create_and_initialize(
            self.ledger,
            self.payer,
            &program_id,
            self.state_account_size,
            call,
            &[],
        )?;

        info!(state_account = %bytes_to_address(&state.address), "state initialized");
        self.state_account = Some(state.address);
        self.advance(Stage::StateInitialized);
        Ok(state)
    }

    /// Use a state account initialized earlier.
    pub fn adopt_state_account(&mut self, state: Pubkey) -> Result<(), DeployError> {
        self.require("adopt state account", |s| s == Stage::ProgramDeployed)?;
        info!(state_account = %bytes_to_address(&state), "using existing state account");
        self.state_account = Some(state);
        self.advance(Stage::StateInitialized);
        Ok(())
    }

    /// Create a stake account for `user`. Can be repeated for any number of
    /// users; each call is an independent transaction co-signed by the user.
    pub fn create_stake_account(&self, user: &Keypair) -> Result<ProvisionedAccount, DeployError> {
        self.require("create stake account", |s| s >= Stage::StateInitialized)?;
        let program_id = self.deployed_program("create stake account")?;
        let state = self.state_account.ok_or(DeployError::OutOfOrder {
            step: "create stake account",
            stage: self.stage.get(),
        })?;

        let call = DomainCall {
            instruction: StakingInstruction::CreateStakeAccount,
            accounts: vec![
                SolAccountMeta::readonly(state),
                SolAccountMeta::readonly_signer(user.pubkey()),
                SolAccountMeta::readonly(SYSTEM_PROGRAM_ID),
            ],
        };
        let stake = create_and_initialize(
            self.ledger,
            self.payer,
            &program_id,
            self.stake_account_size,
            call,
            &[user],
        )?;

        info!(
            user = %user.address(),
            stake_account = %bytes_to_address(&stake.address),
            "stake account created"
        );
        self.advance(Stage::StakeAccountCreated);
        Ok(stake)
    }

    /// Use a stake account created earlier for `user`.
    pub fn adopt_stake_account(&self, user: &Pubkey, stake: &Pubkey) -> Result<(), DeployError> {
        self.require("adopt stake account", |s| s >= Stage::StateInitialized)?;
        info!(
            user = %bytes_to_address(user),
            stake_account = %bytes_to_address(stake),
            "using existing stake account"
        );
        self.advance(Stage::StakeAccountCreated);
        Ok(())
    }

    fn deployed_program(&self, step: &'static str) -> Result<Pubkey, DeployError> {
        self.program_id.ok_or(DeployError::OutOfOrder {
            step,
            stage: self.stage.get(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StakeAccountReport {
    pub user: String,
    pub address: String,
    /// `None` when the account was taken from the manifest.
    pub signature: Option<String>,
}

/// Outcome of [`run`], printed by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub cluster: String,
    pub node_version: String,
    pub payer: String,
    pub stage: Stage,
    pub payer_balance: Option<u64>,
    pub program_id: Option<String>,
    pub state_account: Option<ProvisionedAccount>,
    pub adopted_state_account: Option<String>,
    pub stake_accounts: Vec<StakeAccountReport>,
}

struct ManifestFile {
    path: PathBuf,
    manifest: DeploymentManifest,
}

impl ManifestFile {
    fn update(&mut self, f: impl FnOnce(&mut DeploymentManifest)) -> Result<(), DeployError> {
        f(&mut self.manifest);
        self.manifest.save(&self.path)
    }
}

/// Each user gets one stake account, so a user listed twice is a
/// configuration error.
fn reject_duplicate_users(config: &DeployConfig, users: &[Keypair]) -> Result<(), DeployError> {
    let mut seen = HashSet::with_capacity(users.len());
    for (user, entry) in users.iter().zip(&config.stake_accounts) {
        if !seen.insert(user.pubkey()) {
            return Err(DeployError::Config(format!(
                "stake_accounts: user {} ({}) is listed more than once",
                user.address(),
                entry.user_keypair_path.display()
            )));
        }
    }
    Ok(())
}

fn missing(field: &str) -> DeployError {
    DeployError::Config(format!("`{field}` is required by the deployment plan"))
}

/// Run every step `config` asks for, in order, against `ledger`.
///
/// All local files are read before the first network call. With a
/// manifest configured, progress is saved after each step and steps
/// recorded by an earlier run are adopted instead of repeated.
pub fn run<L: LedgerClient + ?Sized>(
    config: &DeployConfig,
    ledger: &L,
    payer: &Keypair,
) -> Result<DeploymentReport, DeployError> {
    config.validate()?;
    let cluster = config.cluster()?;

    let bytecode = match &config.program {
        Some(program) => {
            let bytes = fs::read(&program.path).map_err(|e| DeployError::file(&program.path, e))?;
            if bytes.is_empty() {
                return Err(DeployError::file(&program.path, "program bytecode is empty"));
            }
            Some(bytes)
        }
        None => None,
    };

    let users = config
        .stake_accounts
        .iter()
        .map(|stake| {
            keystore::read_keypair(&stake.user_keypair_path)
                .map_err(|reason| DeployError::file(&stake.user_keypair_path, reason))
        })
        .collect::<Result<Vec<_>, _>>()?;
    reject_duplicate_users(config, &users)?;

    let mut manifest = match &config.manifest_path {
        Some(path) => Some(ManifestFile {
            manifest: DeploymentManifest::load_or_new(path, cluster.as_str(), &payer.pubkey())?,
            path: path.clone(),
        }),
        None => None,
    };

    let mut orchestrator = Orchestrator::new(ledger, payer)
        .with_funding(config.funding_policy()?)
        .with_loader(config.loader_id()?)
        .with_account_sizes(config.state_account_size, config.stake_account_size);

    info!(%cluster, payer = %payer.address(), "starting deployment");
    let node_version = orchestrator.connect()?;

    let mut report = DeploymentReport {
        cluster: cluster.to_string(),
        node_version,
        payer: payer.address(),
        stage: orchestrator.stage(),
        payer_balance: None,
        program_id: None,
        state_account: None,
        adopted_state_account: None,
        stake_accounts: Vec::new(),
    };

    for step in config.plan() {
        match step {
            Step::Fund => {
                report.payer_balance = orchestrator.fund()?;
            }
            Step::DeployProgram => {
                let recorded = match &manifest {
                    Some(m) => m.manifest.program_id()?,
                    None => None,
                };
                if let Some(program_id) = recorded {
                    orchestrator.adopt_program(program_id)?;
                } else {
                    let bytecode = bytecode.as_deref().ok_or_else(|| missing("program"))?;
                    let program_id = orchestrator.deploy_program(bytecode)?;
                    if let Some(m) = manifest.as_mut() {
                        m.update(|m| m.record_program(&program_id))?;
                    }
                }
            }
            Step::AdoptProgram => {
                let program_id = config.program_id()?.ok_or_else(|| missing("program_id"))?;
                orchestrator.adopt_program(program_id)?;
                if let Some(m) = manifest.as_mut() {
                    if m.manifest.program_id()? != Some(program_id) {
                        m.update(|m| m.record_program(&program_id))?;
                    }
                }
            }
            Step::InitializeState => {
                let recorded = match &manifest {
                    Some(m) => m.manifest.state_account()?,
                    None => None,
                };
                if let Some(state) = recorded {
                    orchestrator.adopt_state_account(state)?;
                    report.adopted_state_account = Some(bytes_to_address(&state));
                } else {
                    let init = config.initialize.as_ref().ok_or_else(|| missing("initialize"))?;
                    let state =
                        orchestrator.initialize_state(init.staking_period, init.reward_rate, config.mint()?)?;
                    if let Some(m) = manifest.as_mut() {
                        m.update(|m| m.record_state_account(&state.address))?;
                    }
                    report.state_account = Some(state);
                }
            }
            Step::AdoptState => {
                let state = config.state_account()?.ok_or_else(|| missing("state_account"))?;
                orchestrator.adopt_state_account(state)?;
                if let Some(m) = manifest.as_mut() {
                    if m.manifest.state_account()? != Some(state) {
                        m.update(|m| m.record_state_account(&state))?;
                    }
                }
                report.adopted_state_account = Some(bytes_to_address(&state));
            }
            Step::CreateStakeAccount(i) => {
                let user = users.get(i).ok_or_else(|| missing("stake_accounts"))?;
                let recorded = match &manifest {
                    Some(m) => m.manifest.stake_account(&user.pubkey())?,
                    None => None,
                };
                let entry = match recorded {
                    Some(stake) => {
                        orchestrator.adopt_stake_account(&user.pubkey(), &stake)?;
                        StakeAccountReport {
                            user: user.address(),
                            address: bytes_to_address(&stake),
                            signature: None,
                        }
                    }
                    None => {
                        let stake = orchestrator.create_stake_account(user)?;
                        if let Some(m) = manifest.as_mut() {
                            m.update(|m| m.record_stake_account(&user.pubkey(), &stake.address))?;
                        }
                        StakeAccountReport {
                            user: user.address(),
                            address: bytes_to_address(&stake.address),
                            signature: Some(stake.signature),
                        }
                    }
                };
                report.stake_accounts.push(entry);
            }
        }
    }

    report.stage = orchestrator.stage();
    report.program_id = orchestrator.program_id().map(|id| bytes_to_address(&id));
    info!(stage = %report.stage, "deployment complete");
    Ok(report)
}
