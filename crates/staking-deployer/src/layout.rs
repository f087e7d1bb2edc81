//! On-chain account layouts of the staking program, used to validate the
//! configured account sizes before any account is created.

use chain_sol::MAX_PERMITTED_DATA_LENGTH;

use crate::error::DeployError;

/// Default allocation for both account kinds.
pub const DEFAULT_ACCOUNT_SIZE: usize = 1000;

/// Global staking configuration:
/// `is_initialized u8 | admin [u8; 32] | mint [u8; 32] | staking_period u64 |
///  reward_rate u64 | total_staked u64`
pub const STATE_ACCOUNT_MIN_SIZE: usize = 1 + 32 + 32 + 8 + 8 + 8;

/// Per-user stake record:
/// `is_initialized u8 | user [u8; 32] | state [u8; 32] | amount u64 |
///  staked_at i64 | last_claim i64`
pub const STAKE_ACCOUNT_MIN_SIZE: usize = 1 + 32 + 32 + 8 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    State,
    Stake,
}

impl AccountKind {
    pub fn min_size(self) -> usize {
        match self {
            AccountKind::State => STATE_ACCOUNT_MIN_SIZE,
            AccountKind::Stake => STAKE_ACCOUNT_MIN_SIZE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccountKind::State => "state account",
            AccountKind::Stake => "stake account",
        }
    }
}

/// Check that `size` can hold the layout of `kind` and can be allocated.
pub fn validate_account_size(kind: AccountKind, size: usize) -> Result<(), DeployError> {
    if size < kind.min_size() {
        return Err(DeployError::Config(format!(
            "{} size {size} is smaller than its {}-byte layout",
            kind.name(),
            kind.min_size()
        )));
    }
    if size as u64 > MAX_PERMITTED_DATA_LENGTH {
        return Err(DeployError::Config(format!(
            "{} size {size} exceeds the {MAX_PERMITTED_DATA_LENGTH}-byte maximum",
            kind.name()
        )));
    }
    Ok(())
}
