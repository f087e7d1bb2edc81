use std::env;
use std::process::ExitCode;

use staking_deployer::ledger::sol_to_lamports;
use staking_deployer::{keystore, run, DeployConfig, DeployError, RpcLedgerClient, SimulatedLedger};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: deploy-staking [--dry-run] <config.json>";

/// Payer balance on the in-memory ledger used by `--dry-run`.
const DRY_RUN_BALANCE_SOL: u64 = 100;

struct Args {
    dry_run: bool,
    config_path: String,
}

fn parse_args() -> Result<Args, DeployError> {
    let mut dry_run = false;
    let mut config_path = None;

    for arg in env::args().skip(1) {
        if arg == "--dry-run" {
            dry_run = true;
        } else if arg.starts_with('-') {
            return Err(DeployError::Config(format!("unknown flag `{arg}`; {USAGE}")));
        } else if config_path.is_some() {
            return Err(DeployError::Config(format!("unexpected argument `{arg}`; {USAGE}")));
        } else {
            config_path = Some(arg);
        }
    }

    let config_path = config_path.ok_or_else(|| DeployError::Config(USAGE.into()))?;
    Ok(Args { dry_run, config_path })
}

fn deploy() -> Result<(), DeployError> {
    let args = parse_args()?;
    let config = DeployConfig::load(&args.config_path)?;
    let payer = keystore::load(&config.keypair_path)?;

    let report = if args.dry_run {
        info!("dry run against an in-memory ledger");
        let ledger = SimulatedLedger::new();
        ledger.credit(&payer.pubkey(), sol_to_lamports(DRY_RUN_BALANCE_SOL));
        run(&config, &ledger, &payer)?
    } else {
        let ledger = RpcLedgerClient::new(
            config.endpoint()?,
            config.commitment,
            config.request_timeout(),
            config.confirm_timeout(),
        );
        info!(url = ledger.url(), "using rpc endpoint");
        run(&config, &ledger, &payer)?
    };

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| DeployError::Config(format!("cannot render report: {e}")))?;
    println!("{json}");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match deploy() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
