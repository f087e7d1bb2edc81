//! In-memory ledger.
//!
//! Executes transactions against a local account map with the same rules the
//! deployer relies on from a real cluster: signatures over every required
//! signer, atomic transactions, rent-exempt account creation, "account
//! already in use" on re-creation, loader writes, and ownership checks for
//! the staking program's instructions. Backs `--dry-run` and the test suite.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chain_sol::{
    bytes_to_address, compile_transaction, sign_transaction, supports_write_finalize, Keypair,
    Pubkey, SolInstruction, BPF_LOADER_UPGRADEABLE_ID, SYSTEM_PROGRAM_ID,
};

use crate::instruction::StakingInstruction;
use crate::layout::{STAKE_ACCOUNT_MIN_SIZE, STATE_ACCOUNT_MIN_SIZE};
use crate::ledger::{LedgerClient, LedgerError, Transaction};

pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;
const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
const EXEMPTION_THRESHOLD_YEARS: u64 = 2;

/// Rent-exempt minimum with the default cluster rent parameters.
pub fn rent_exempt_minimum(size: usize) -> u64 {
    (ACCOUNT_STORAGE_OVERHEAD + size as u64) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_THRESHOLD_YEARS
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: Vec<u8>,
    pub executable: bool,
}

/// A transaction that landed, with the keys that signed it.
#[derive(Debug, Clone)]
pub struct SubmittedTransaction {
    pub signature: String,
    pub transaction: Transaction,
    pub signers: Vec<Pubkey>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Pubkey, AccountRecord>,
    submitted: Vec<SubmittedTransaction>,
    submit_attempts: usize,
    airdrops: u64,
    rent_queries: usize,
    fail_confirmation_at: Option<usize>,
    faucet_limit: Option<u64>,
}

#[derive(Default)]
pub struct SimulatedLedger {
    state: Mutex<State>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Credit `lamports` to a system-owned account.
    pub fn credit(&self, pubkey: &Pubkey, lamports: u64) {
        let mut state = self.state();
        let account = state.accounts.entry(*pubkey).or_insert_with(system_account);
        account.lamports = account.lamports.saturating_add(lamports);
    }

    /// The `n`-th submission (0-based) never confirms.
    pub fn fail_confirmation_at(&self, n: usize) {
        self.state().fail_confirmation_at = Some(n);
    }

    /// Airdrops larger than `lamports` are refused.
    pub fn set_faucet_limit(&self, lamports: u64) {
        self.state().faucet_limit = Some(lamports);
    }

    pub fn account(&self, pubkey: &Pubkey) -> Option<AccountRecord> {
        self.state().accounts.get(pubkey).cloned()
    }

    pub fn submitted(&self) -> Vec<SubmittedTransaction> {
        self.state().submitted.clone()
    }

    pub fn submit_attempts(&self) -> usize {
        self.state().submit_attempts
    }

    pub fn rent_queries(&self) -> usize {
        self.state().rent_queries
    }

    pub fn airdrop_count(&self) -> u64 {
        self.state().airdrops
    }
}

fn system_account() -> AccountRecord {
    AccountRecord {
        lamports: 0,
        owner: SYSTEM_PROGRAM_ID,
        data: Vec::new(),
        executable: false,
    }
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)?.try_into().ok().map(u32::from_le_bytes)
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8)?.try_into().ok().map(u64::from_le_bytes)
}

fn account_key(ix: &SolInstruction, i: usize) -> Result<Pubkey, String> {
    ix.accounts
        .get(i)
        .map(|m| m.pubkey)
        .ok_or_else(|| format!("missing account #{i}"))
}

fn debit(accounts: &mut HashMap<Pubkey, AccountRecord>, from: &Pubkey, lamports: u64) -> Result<(), String> {
    let account = accounts
        .get_mut(from)
        .filter(|a| a.lamports >= lamports)
        .ok_or_else(|| format!("insufficient lamports in {}", bytes_to_address(from)))?;
    account.lamports -= lamports;
    Ok(())
}

fn execute_system(accounts: &mut HashMap<Pubkey, AccountRecord>, ix: &SolInstruction) -> Result<(), String> {
    let from = account_key(ix, 0)?;
    let to = account_key(ix, 1)?;

    match read_u32(&ix.data, 0) {
        Some(0) => {
            let (lamports, space, owner) = match (
                read_u64(&ix.data, 4),
                read_u64(&ix.data, 12),
                ix.data.get(20..52),
            ) {
                (Some(l), Some(s), Some(o)) if ix.data.len() == 52 => (l, s, o),
                _ => return Err("malformed CreateAccount data".into()),
            };
            if let Some(existing) = accounts.get(&to) {
                if existing.lamports > 0 || !existing.data.is_empty() || existing.owner != SYSTEM_PROGRAM_ID {
                    return Err(format!("account {} already in use", bytes_to_address(&to)));
                }
            }
            if lamports < rent_exempt_minimum(space as usize) {
                return Err(format!(
                    "insufficient funds for rent: {} needs {}",
                    bytes_to_address(&to),
                    rent_exempt_minimum(space as usize)
                ));
            }
            debit(accounts, &from, lamports)?;

            let mut owner_key = [0u8; 32];
            owner_key.copy_from_slice(owner);
            accounts.insert(
                to,
                AccountRecord {
                    lamports,
                    owner: owner_key,
                    data: vec![0u8; space as usize],
                    executable: false,
                },
            );
            Ok(())
        }
        Some(2) => {
            let lamports = read_u64(&ix.data, 4).ok_or("malformed Transfer data")?;
            debit(accounts, &from, lamports)?;
            let target = accounts.entry(to).or_insert_with(system_account);
            target.lamports = target.lamports.saturating_add(lamports);
            Ok(())
        }
        _ => Err("unsupported system instruction".into()),
    }
}

fn execute_loader(accounts: &mut HashMap<Pubkey, AccountRecord>, ix: &SolInstruction) -> Result<(), String> {
    let program = account_key(ix, 0)?;
    let account = accounts
        .get_mut(&program)
        .filter(|a| a.owner == ix.program_id)
        .ok_or_else(|| format!("{} is not owned by the loader", bytes_to_address(&program)))?;
    if account.executable {
        return Err("program is already finalized".into());
    }

    match read_u32(&ix.data, 0) {
        Some(0) => {
            let offset = read_u32(&ix.data, 4).ok_or("malformed Write data")? as usize;
            let len = read_u64(&ix.data, 8).ok_or("malformed Write data")? as usize;
            let bytes = ix
                .data
                .get(16..)
                .filter(|b| b.len() == len)
                .ok_or("malformed Write data")?;
            let end = offset + len;
            if end > account.data.len() {
                return Err(format!("write past end of account ({end} > {})", account.data.len()));
            }
            account.data[offset..end].copy_from_slice(bytes);
            Ok(())
        }
        Some(1) => {
            account.executable = true;
            Ok(())
        }
        _ => Err("unsupported loader instruction".into()),
    }
}

fn execute_staking(accounts: &mut HashMap<Pubkey, AccountRecord>, ix: &SolInstruction) -> Result<(), String> {
    let deployed = accounts
        .get(&ix.program_id)
        .map(|a| a.executable)
        .unwrap_or(false);
    if !deployed {
        return Err(format!("program {} is not deployed", bytes_to_address(&ix.program_id)));
    }

    let instruction = StakingInstruction::decode(&ix.data).map_err(|e| e.to_string())?;
    let target = account_key(ix, 0)?;

    match instruction {
        StakingInstruction::Initialize {
            staking_period,
            reward_rate,
        } => {
            let admin = account_key(ix, 2)?;
            let mint = account_key(ix, 1)?;
            let state = owned_uninitialized(accounts, &target, &ix.program_id, STATE_ACCOUNT_MIN_SIZE)?;
            state.data[0] = 1;
            state.data[1..33].copy_from_slice(&admin);
            state.data[33..65].copy_from_slice(&mint);
            state.data[65..73].copy_from_slice(&staking_period.to_le_bytes());
            state.data[73..81].copy_from_slice(&reward_rate.to_le_bytes());
            Ok(())
        }
        StakingInstruction::CreateStakeAccount => {
            let state_key = account_key(ix, 1)?;
            let user = account_key(ix, 2)?;
            let state_ready = accounts
                .get(&state_key)
                .map(|a| a.owner == ix.program_id && a.data.first() == Some(&1))
                .unwrap_or(false);
            if !state_ready {
                return Err(format!("{} is not an initialized state account", bytes_to_address(&state_key)));
            }
            let stake = owned_uninitialized(accounts, &target, &ix.program_id, STAKE_ACCOUNT_MIN_SIZE)?;
            stake.data[0] = 1;
            stake.data[1..33].copy_from_slice(&user);
            stake.data[33..65].copy_from_slice(&state_key);
            Ok(())
        }
    }
}

fn owned_uninitialized<'a>(
    accounts: &'a mut HashMap<Pubkey, AccountRecord>,
    key: &Pubkey,
    program_id: &Pubkey,
    min_size: usize,
) -> Result<&'a mut AccountRecord, String> {
    let account = accounts
        .get_mut(key)
        .filter(|a| a.owner == *program_id)
        .ok_or_else(|| format!("{} is not owned by the program", bytes_to_address(key)))?;
    if account.data.len() < min_size {
        return Err(format!("account data too small: {} < {min_size}", account.data.len()));
    }
    if account.data[0] != 0 {
        return Err("account already initialized".into());
    }
    Ok(account)
}

impl LedgerClient for SimulatedLedger {
    fn cluster_version(&self) -> Result<String, LedgerError> {
        Ok("simulated".into())
    }

    fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, LedgerError> {
        Ok(self.state().accounts.get(pubkey).map_or(0, |a| a.lamports))
    }

    fn minimum_balance_for_rent_exemption(&self, size: usize) -> Result<u64, LedgerError> {
        self.state().rent_queries += 1;
        Ok(rent_exempt_minimum(size))
    }

    fn request_airdrop(&self, pubkey: &Pubkey, lamports: u64) -> Result<String, LedgerError> {
        let mut state = self.state();
        if let Some(limit) = state.faucet_limit {
            if lamports > limit {
                return Err(LedgerError::Airdrop(format!(
                    "requested {lamports} lamports, faucet limit is {limit}"
                )));
            }
        }
        state.airdrops += 1;
        let account = state.accounts.entry(*pubkey).or_insert_with(system_account);
        account.lamports = account.lamports.saturating_add(lamports);

        let mut sig = [0xFAu8; 64];
        sig[..8].copy_from_slice(&state.airdrops.to_le_bytes());
        Ok(bs58::encode(sig).into_string())
    }

    fn submit_and_confirm(
        &self,
        transaction: &Transaction,
        signers: &[&Keypair],
    ) -> Result<String, LedgerError> {
        let mut state = self.state();
        let attempt = state.submit_attempts;
        state.submit_attempts += 1;

        let mut blockhash = [0u8; 32];
        blockhash[..8].copy_from_slice(&(attempt as u64).to_le_bytes());
        let compiled = compile_transaction(&transaction.instructions, &transaction.fee_payer, &blockhash)?;
        let signed = sign_transaction(&compiled, signers)?;
        let signature = signed.id();

        if state.fail_confirmation_at == Some(attempt) {
            return Err(LedgerError::ConfirmationTimeout {
                signature,
                waited_ms: 0,
            });
        }

        let fail = |reason: String| LedgerError::TransactionFailed {
            signature: signature.clone(),
            reason,
        };

        // Execute on a copy so a failing instruction leaves no trace.
        let mut accounts = state.accounts.clone();
        let fee = LAMPORTS_PER_SIGNATURE * signed.signatures.len() as u64;
        debit(&mut accounts, &transaction.fee_payer, fee).map_err(|e| fail(format!("fee: {e}")))?;

        for (i, ix) in transaction.instructions.iter().enumerate() {
            let result = if ix.program_id == SYSTEM_PROGRAM_ID {
                execute_system(&mut accounts, ix)
            } else if supports_write_finalize(&ix.program_id) {
                execute_loader(&mut accounts, ix)
            } else if ix.program_id == BPF_LOADER_UPGRADEABLE_ID {
                Err("upgradeable loader instructions are not supported".into())
            } else {
                execute_staking(&mut accounts, ix)
            };
            result.map_err(|e| fail(format!("instruction {i}: {e}")))?;
        }

        state.accounts = accounts;
        state.submitted.push(SubmittedTransaction {
            signature: signature.clone(),
            transaction: transaction.clone(),
            signers: signers.iter().map(|kp| kp.pubkey()).collect(),
        });
        Ok(signature)
    }
}
