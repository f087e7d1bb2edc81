//! Staking program instruction codec.
//!
//! Instructions are Borsh-encoded: one opcode byte (the variant index)
//! followed by each field in declaration order at its natural width,
//! little-endian, no padding, no length prefixes.
//!
//! ```text
//! Initialize:          0x00 | u64 LE staking_period | u64 LE reward_rate   (17 bytes)
//! CreateStakeAccount:  0x01                                                 (1 byte)
//! ```
//!
//! New opcodes must be appended at the end of the enum; variant order is the
//! wire opcode.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

/// Reward rates are expressed in basis points of this denominator.
pub const REWARD_RATE_DENOMINATOR: u64 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("cannot decode instruction: {0}")]
    Decode(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum StakingInstruction {
    /// Opcode 0. Initializes the global staking configuration account.
    Initialize { staking_period: u64, reward_rate: u64 },

    /// Opcode 1. Registers a stake account for a user.
    CreateStakeAccount,
}

impl StakingInstruction {
    pub fn opcode(&self) -> u8 {
        match self {
            StakingInstruction::Initialize { .. } => 0,
            StakingInstruction::CreateStakeAccount => 1,
        }
    }

    /// Reject field values the program would refuse. Runs before anything
    /// is sent to the network.
    pub fn validate(&self) -> Result<(), CodecError> {
        match self {
            StakingInstruction::Initialize {
                staking_period,
                reward_rate,
            } => {
                if *staking_period == 0 {
                    return Err(CodecError::InvalidField {
                        field: "staking_period",
                        reason: "must be at least one second".into(),
                    });
                }
                if *reward_rate > REWARD_RATE_DENOMINATOR {
                    return Err(CodecError::InvalidField {
                        field: "reward_rate",
                        reason: format!(
                            "{reward_rate} exceeds {REWARD_RATE_DENOMINATOR} basis points"
                        ),
                    });
                }
                Ok(())
            }
            StakingInstruction::CreateStakeAccount => Ok(()),
        }
    }

    /// Validate and encode to instruction data.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.validate()?;
        borsh::to_vec(self).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Decode instruction data. Truncated input, trailing bytes and unknown
    /// opcodes are all errors.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        borsh::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
