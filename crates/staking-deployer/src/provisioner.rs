//! Account Provisioner: creates a program-owned account and runs the
//! program's initialization instruction on it in a single transaction, so
//! an account is never left allocated but uninitialized.

use chain_sol::{build_create_account, bytes_to_address, Keypair, Pubkey, SolAccountMeta, SolInstruction};
use serde::{Serialize, Serializer};
use tracing::info;

use crate::error::DeployError;
use crate::instruction::StakingInstruction;
use crate::layout::{validate_account_size, AccountKind};
use crate::ledger::{LedgerClient, Transaction};

/// A staking program instruction and the accounts it takes after the
/// account being provisioned.
#[derive(Debug, Clone)]
pub struct DomainCall {
    pub instruction: StakingInstruction,
    pub accounts: Vec<SolAccountMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedAccount {
    #[serde(serialize_with = "serialize_pubkey")]
    pub address: Pubkey,
    pub signature: String,
    pub rent_lamports: u64,
    pub size: usize,
}

pub(crate) fn serialize_pubkey<S: Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&bytes_to_address(key))
}

fn target_kind(instruction: &StakingInstruction) -> AccountKind {
    match instruction {
        StakingInstruction::Initialize { .. } => AccountKind::State,
        StakingInstruction::CreateStakeAccount => AccountKind::Stake,
    }
}

/// Create a fresh account of `account_size` bytes owned by `program_id` and
/// initialize it with `call`, atomically.
///
/// The instruction is encoded and the size checked before anything is sent.
/// Signers are the payer, the new account and `extra_signers`. Ledger errors
/// are returned unchanged.
pub fn create_and_initialize<L: LedgerClient + ?Sized>(
    ledger: &L,
    payer: &Keypair,
    program_id: &Pubkey,
    account_size: usize,
    call: DomainCall,
    extra_signers: &[&Keypair],
) -> Result<ProvisionedAccount, DeployError> {
    validate_account_size(target_kind(&call.instruction), account_size)?;
    let data = call.instruction.encode()?;

    let account = Keypair::generate();
    let rent_lamports = ledger.minimum_balance_for_rent_exemption(account_size)?;

    let create = build_create_account(
        &payer.pubkey(),
        &account.pubkey(),
        rent_lamports,
        account_size as u64,
        program_id,
    )?;

    let mut accounts = Vec::with_capacity(call.accounts.len() + 1);
    accounts.push(SolAccountMeta::writable(account.pubkey()));
    accounts.extend(call.accounts);
    let initialize = SolInstruction {
        program_id: *program_id,
        accounts,
        data,
    };

    let transaction = Transaction::new(payer.pubkey()).add(create).add(initialize);

    let mut signers: Vec<&Keypair> = vec![payer, &account];
    signers.extend_from_slice(extra_signers);

    let signature = ledger.submit_and_confirm(&transaction, &signers)?;
    info!(
        address = %account.address(),
        %signature,
        rent_lamports,
        size = account_size,
        opcode = call.instruction.opcode(),
        "account provisioned"
    );

    Ok(ProvisionedAccount {
        address: account.pubkey(),
        signature,
        rent_lamports,
        size: account_size,
    })
}
