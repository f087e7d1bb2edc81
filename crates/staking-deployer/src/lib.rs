//! Deployment orchestration for the staking program.
//!
//! Loads (or creates) the deployer identity, funds it, deploys the program,
//! initializes its global state account and creates per-user stake
//! accounts. Network access goes through [`ledger::LedgerClient`], backed by
//! JSON-RPC ([`rpc::RpcLedgerClient`]) or an in-memory ledger
//! ([`simulated::SimulatedLedger`]).

mod atomic;
pub mod config;
pub mod error;
pub mod instruction;
pub mod keystore;
pub mod layout;
pub mod ledger;
pub mod manifest;
pub mod orchestrator;
pub mod provisioner;
pub mod rpc;
pub mod simulated;

pub use config::{Cluster, DeployConfig, Step};
pub use error::DeployError;
pub use instruction::{CodecError, StakingInstruction};
pub use ledger::{Commitment, LedgerClient, LedgerError, Transaction};
pub use manifest::DeploymentManifest;
pub use orchestrator::{run, DeploymentReport, Orchestrator, Stage};
pub use provisioner::{create_and_initialize, DomainCall, ProvisionedAccount};
pub use rpc::RpcLedgerClient;
pub use simulated::SimulatedLedger;
