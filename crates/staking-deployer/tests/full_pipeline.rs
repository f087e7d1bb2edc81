//! End-to-end deployments through the public API against the in-memory
//! ledger: config file -> keystore -> run -> ledger state.

use std::fs;
use std::path::{Path, PathBuf};

use chain_sol::{address_to_bytes, Keypair, SYSTEM_PROGRAM_ID};
use staking_deployer::config::{
    FundingConfig, InitializeConfig, ProgramConfig, StakeAccountConfig,
};
use staking_deployer::keystore;
use staking_deployer::layout::DEFAULT_ACCOUNT_SIZE;
use staking_deployer::simulated::rent_exempt_minimum;
use staking_deployer::*;

const PROGRAM_SIZE: usize = 2048;

struct Fixture {
    dir: tempfile::TempDir,
    payer: Keypair,
    ledger: SimulatedLedger,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let payer = keystore::load(dir.path().join("deployer.json")).unwrap();
        let ledger = SimulatedLedger::new();
        ledger.credit(&payer.pubkey(), 20_000_000_000);
        Self { dir, payer, ledger }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write_program(&self) -> PathBuf {
        let path = self.path("staking.so");
        let bytecode: Vec<u8> = (0..PROGRAM_SIZE).map(|i| (i * 7 % 256) as u8).collect();
        fs::write(&path, bytecode).unwrap();
        path
    }

    fn write_user(&self, name: &str, seed: u8) -> (PathBuf, Keypair) {
        let path = self.path(name);
        let user = Keypair::from_seed(&[seed; 32]);
        keystore::write_keypair(&path, &user).unwrap();
        (path, user)
    }

    fn full_config(&self, users: &[&Path]) -> DeployConfig {
        DeployConfig {
            keypair_path: self.path("deployer.json"),
            funding: Some(FundingConfig {
                min_balance_sol: 2,
                airdrop_sol: Some(2),
                disabled: false,
            }),
            program: Some(ProgramConfig {
                path: self.write_program(),
                loader: None,
            }),
            initialize: Some(InitializeConfig {
                staking_period: 86_400,
                reward_rate: 500,
                mint: None,
            }),
            stake_accounts: users
                .iter()
                .map(|p| StakeAccountConfig {
                    user_keypair_path: p.to_path_buf(),
                })
                .collect(),
            ..DeployConfig::default()
        }
    }
}

fn pubkey(address: &str) -> [u8; 32] {
    address_to_bytes(address).unwrap()
}

#[test]
fn deploys_program_sized_to_its_bytecode() {
    let fx = Fixture::new();
    let config = DeployConfig {
        program: Some(ProgramConfig {
            path: fx.write_program(),
            loader: None,
        }),
        ..DeployConfig::default()
    };

    let report = run(&config, &fx.ledger, &fx.payer).unwrap();

    assert_eq!(report.stage, Stage::ProgramDeployed);
    let program_id = pubkey(report.program_id.as_deref().unwrap());
    assert_ne!(program_id, fx.payer.pubkey());

    let account = fx.ledger.account(&program_id).unwrap();
    assert_eq!(account.data.len(), PROGRAM_SIZE);
    assert_eq!(account.data, fs::read(fx.path("staking.so")).unwrap());
    assert_eq!(account.lamports, rent_exempt_minimum(PROGRAM_SIZE));
    assert!(account.executable);
}

#[test]
fn initialize_instruction_has_fixed_encoding() {
    let data = StakingInstruction::Initialize {
        staking_period: 86_400,
        reward_rate: 500,
    }
    .encode()
    .unwrap();

    assert_eq!(data.len(), 17);
    assert_eq!(data[0], 0);
    assert_eq!(&data[1..9], &86_400u64.to_le_bytes());
    assert_eq!(&data[9..17], &500u64.to_le_bytes());
    assert_eq!(StakingInstruction::CreateStakeAccount.encode().unwrap(), vec![1]);
}

#[test]
fn full_deployment_creates_program_owned_accounts() {
    let fx = Fixture::new();
    let (alice_path, alice) = fx.write_user("alice.json", 7);
    let config = fx.full_config(&[alice_path.as_path()]);

    let report = run(&config, &fx.ledger, &fx.payer).unwrap();
    assert_eq!(report.stage, Stage::StakeAccountCreated);

    let program_id = pubkey(report.program_id.as_deref().unwrap());
    let state = report.state_account.as_ref().unwrap();
    let state_account = fx.ledger.account(&state.address).unwrap();
    assert_eq!(state_account.owner, program_id);
    assert_eq!(state_account.data.len(), DEFAULT_ACCOUNT_SIZE);
    assert_eq!(state_account.data[0], 1);

    assert_eq!(report.stake_accounts.len(), 1);
    let stake_report = &report.stake_accounts[0];
    assert_eq!(stake_report.user, alice.address());
    let stake = fx.ledger.account(&pubkey(&stake_report.address)).unwrap();
    assert_eq!(stake.owner, program_id);
    assert_eq!(stake.data.len(), DEFAULT_ACCOUNT_SIZE);
    assert_eq!(stake.lamports, rent_exempt_minimum(DEFAULT_ACCOUNT_SIZE));
}

#[test]
fn stake_account_transaction_is_cosigned_by_user() {
    let fx = Fixture::new();
    let (alice_path, alice) = fx.write_user("alice.json", 7);
    let config = fx.full_config(&[alice_path.as_path()]);

    let report = run(&config, &fx.ledger, &fx.payer).unwrap();
    let program_id = pubkey(report.program_id.as_deref().unwrap());
    let state = report.state_account.unwrap().address;
    let stake = pubkey(&report.stake_accounts[0].address);

    let last = fx.ledger.submitted().pop().unwrap();
    assert_eq!(last.signers, vec![fx.payer.pubkey(), stake, alice.pubkey()]);

    let [create, init] = last.transaction.instructions.as_slice() else {
        panic!("expected two instructions");
    };
    assert_eq!(create.program_id, SYSTEM_PROGRAM_ID);
    assert_eq!(init.program_id, program_id);
    assert_eq!(init.data, vec![1]);
    let keys: Vec<_> = init.accounts.iter().map(|m| m.pubkey).collect();
    assert_eq!(keys, vec![stake, state, alice.pubkey(), SYSTEM_PROGRAM_ID]);
    assert!(init.accounts[0].is_writable);
    assert!(init.accounts[2].is_signer);
}

#[test]
fn steps_run_in_pipeline_order() {
    let fx = Fixture::new();
    let (alice_path, _) = fx.write_user("alice.json", 7);
    let (bob_path, _) = fx.write_user("bob.json", 8);
    let config = fx.full_config(&[alice_path.as_path(), bob_path.as_path()]);

    let report = run(&config, &fx.ledger, &fx.payer).unwrap();
    let program_id = pubkey(report.program_id.as_deref().unwrap());

    // Every program instruction comes after the program's Finalize, every
    // CreateStakeAccount after Initialize.
    let opcodes: Vec<Option<u8>> = fx
        .ledger
        .submitted()
        .iter()
        .map(|tx| {
            tx.transaction
                .instructions
                .iter()
                .find(|ix| ix.program_id == program_id)
                .map(|ix| ix.data[0])
        })
        .collect();
    // create + 3 writes + finalize, then initialize, then two stake accounts
    assert_eq!(
        opcodes,
        vec![None, None, None, None, None, Some(0), Some(1), Some(1)]
    );
    assert_ne!(report.stake_accounts[0].address, report.stake_accounts[1].address);
}

#[test]
fn confirmation_timeout_halts_the_run() {
    let fx = Fixture::new();
    let (alice_path, _) = fx.write_user("alice.json", 7);
    let config = fx.full_config(&[alice_path.as_path()]);

    // Submission 5 is the state account initialization.
    fx.ledger.fail_confirmation_at(5);
    let err = run(&config, &fx.ledger, &fx.payer).unwrap_err();

    assert!(matches!(
        err,
        DeployError::Ledger(LedgerError::ConfirmationTimeout { .. })
    ));
    assert!(err.to_string().contains("not confirmed"));
    assert_eq!(fx.ledger.submit_attempts(), 6);
    assert_eq!(fx.ledger.submitted().len(), 5);
}

#[test]
fn missing_files_fail_before_any_network_call() {
    let fx = Fixture::new();
    let config = fx.full_config(&[fx.path("nobody.json").as_path()]);

    let err = run(&config, &fx.ledger, &fx.payer).unwrap_err();
    assert!(matches!(err, DeployError::File { .. }));
    assert_eq!(fx.ledger.submit_attempts(), 0);
    assert_eq!(fx.ledger.airdrop_count(), 0);
}

#[test]
fn user_listed_twice_fails_before_any_network_call() {
    let fx = Fixture::new();
    let (alice_path, alice) = fx.write_user("alice.json", 7);
    let copy_path = fx.path("alice-copy.json");
    fs::copy(&alice_path, &copy_path).unwrap();
    let config = fx.full_config(&[alice_path.as_path(), copy_path.as_path()]);

    let err = run(&config, &fx.ledger, &fx.payer).unwrap_err();
    assert!(matches!(err, DeployError::Config(_)));
    assert!(err.to_string().contains(&alice.address()));
    assert_eq!(fx.ledger.submit_attempts(), 0);
    assert_eq!(fx.ledger.rent_queries(), 0);
}

#[test]
fn missing_funding_section_airdrops_on_localnet() {
    let fx = Fixture::new();
    let payer = Keypair::from_seed(&[42u8; 32]);
    let config = DeployConfig {
        program: Some(ProgramConfig {
            path: fx.write_program(),
            loader: None,
        }),
        ..DeployConfig::default()
    };
    assert!(config.funding.is_none());

    let report = run(&config, &fx.ledger, &payer).unwrap();
    assert_eq!(fx.ledger.airdrop_count(), 1);
    assert_eq!(report.payer_balance, Some(2_000_000_000));
    assert_eq!(report.stage, Stage::ProgramDeployed);
}

#[test]
fn missing_funding_section_on_mainnet_requires_balance() {
    let fx = Fixture::new();
    let payer = Keypair::from_seed(&[42u8; 32]);
    let config = DeployConfig {
        cluster: "mainnet-beta".into(),
        program: Some(ProgramConfig {
            path: fx.write_program(),
            loader: None,
        }),
        ..DeployConfig::default()
    };

    let err = run(&config, &fx.ledger, &payer).unwrap_err();
    assert!(matches!(
        err,
        DeployError::InsufficientFunds { balance: 0, required: 2_000_000_000, .. }
    ));
    assert_eq!(fx.ledger.airdrop_count(), 0);
    assert_eq!(fx.ledger.submit_attempts(), 0);
}

#[test]
fn disabled_funding_skips_the_balance_check() {
    let fx = Fixture::new();
    let config = DeployConfig {
        funding: Some(FundingConfig {
            disabled: true,
            ..FundingConfig::default()
        }),
        ..DeployConfig::default()
    };

    let report = run(&config, &fx.ledger, &fx.payer).unwrap();
    assert_eq!(report.payer_balance, None);
    assert_eq!(report.stage, Stage::Funded);
}

#[test]
fn empty_bytecode_is_a_file_error() {
    let fx = Fixture::new();
    let empty = fx.path("empty.so");
    fs::write(&empty, b"").unwrap();
    let config = DeployConfig {
        program: Some(ProgramConfig {
            path: empty,
            loader: None,
        }),
        ..DeployConfig::default()
    };

    assert!(matches!(
        run(&config, &fx.ledger, &fx.payer),
        Err(DeployError::File { .. })
    ));
    assert_eq!(fx.ledger.submit_attempts(), 0);
}

#[test]
fn manifest_makes_rerun_adopt_previous_work() {
    let fx = Fixture::new();
    let (alice_path, _) = fx.write_user("alice.json", 7);
    let mut config = fx.full_config(&[alice_path.as_path()]);
    config.manifest_path = Some(fx.path("manifest.json"));

    let first = run(&config, &fx.ledger, &fx.payer).unwrap();
    let submitted = fx.ledger.submitted().len();

    let second = run(&config, &fx.ledger, &fx.payer).unwrap();
    assert_eq!(fx.ledger.submitted().len(), submitted);
    assert_eq!(second.program_id, first.program_id);
    assert_eq!(
        second.adopted_state_account.as_deref(),
        Some(chain_sol::bytes_to_address(&first.state_account.unwrap().address).as_str())
    );
    assert_eq!(second.stake_accounts[0].address, first.stake_accounts[0].address);
    assert_eq!(second.stake_accounts[0].signature, None);
    assert_eq!(second.stage, Stage::StakeAccountCreated);

    // A new user on the next run only adds that user's stake account.
    let (bob_path, _) = fx.write_user("bob.json", 8);
    config.stake_accounts.push(StakeAccountConfig {
        user_keypair_path: bob_path,
    });
    let third = run(&config, &fx.ledger, &fx.payer).unwrap();
    assert_eq!(fx.ledger.submitted().len(), submitted + 1);
    assert_eq!(third.stake_accounts.len(), 2);
}

#[test]
fn rerun_without_manifest_deploys_again() {
    let fx = Fixture::new();
    let config = DeployConfig {
        program: Some(ProgramConfig {
            path: fx.write_program(),
            loader: None,
        }),
        ..DeployConfig::default()
    };

    let first = run(&config, &fx.ledger, &fx.payer).unwrap();
    let second = run(&config, &fx.ledger, &fx.payer).unwrap();
    assert_ne!(first.program_id, second.program_id);
}

#[test]
fn adopts_existing_program_and_state() {
    let fx = Fixture::new();
    let (alice_path, _) = fx.write_user("alice.json", 7);
    let deployed = run(&fx.full_config(&[]), &fx.ledger, &fx.payer).unwrap();
    let state = deployed.state_account.unwrap().address;

    let config = DeployConfig {
        program_id: deployed.program_id.clone(),
        state_account: Some(chain_sol::bytes_to_address(&state)),
        stake_accounts: vec![StakeAccountConfig {
            user_keypair_path: alice_path,
        }],
        ..DeployConfig::default()
    };
    let report = run(&config, &fx.ledger, &fx.payer).unwrap();

    assert_eq!(report.program_id, deployed.program_id);
    assert_eq!(report.stake_accounts.len(), 1);
    assert_eq!(report.stage, Stage::StakeAccountCreated);
}

#[test]
fn config_file_drives_the_run() {
    let fx = Fixture::new();
    let program = fx.write_program();
    let config_path = fx.path("deploy.json");
    fs::write(
        &config_path,
        serde_json::json!({
            "cluster": "devnet",
            "keypair_path": fx.path("deployer.json"),
            "funding": { "min_balance_sol": 1 },
            "program": { "path": program },
            "initialize": { "staking_period": 3600, "reward_rate": 100 }
        })
        .to_string(),
    )
    .unwrap();

    let config = DeployConfig::load(&config_path).unwrap();
    let payer = keystore::load(&config.keypair_path).unwrap();
    assert_eq!(payer.pubkey(), fx.payer.pubkey());

    let report = run(&config, &fx.ledger, &payer).unwrap();
    assert_eq!(report.cluster, "devnet");
    assert_eq!(report.stage, Stage::StateInitialized);
    assert_eq!(fx.ledger.airdrop_count(), 0);
}

#[test]
fn keystore_returns_same_identity_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("id.json");
    let first = keystore::load(&path).unwrap();
    let second = keystore::load(&path).unwrap();
    assert_eq!(first.pubkey(), second.pubkey());
}
