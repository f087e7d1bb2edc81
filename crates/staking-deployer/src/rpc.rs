//! JSON-RPC 2.0 ledger client over blocking HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chain_sol::{address_to_bytes, bytes_to_address, compile_transaction, sign_transaction, Keypair, Pubkey};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::ledger::{Commitment, LedgerClient, LedgerError, Transaction};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockhashInfo {
    blockhash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<Commitment>,
}

pub struct RpcLedgerClient {
    agent: ureq::Agent,
    url: String,
    commitment: Commitment,
    confirm_timeout: Duration,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    /// Build a client for `url`. No request is made until the first call.
    ///
    /// `request_timeout` bounds every HTTP round-trip; `confirm_timeout`
    /// bounds the wait for a transaction to reach `commitment`.
    pub fn new(
        url: impl Into<String>,
        commitment: Commitment,
        request_timeout: Duration,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(request_timeout).build(),
            url: url.into(),
            commitment,
            confirm_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "rpc request");

        let response = match self.agent.post(&self.url).send_json(body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let message = response
                    .into_string()
                    .unwrap_or_else(|_| "unreadable body".into());
                return Err(LedgerError::Rpc {
                    method: method.to_string(),
                    code: i64::from(code),
                    message,
                });
            }
            Err(ureq::Error::Transport(e)) => {
                return Err(LedgerError::Connection(format!("{}: {e}", self.url)));
            }
        };

        let parsed: RpcResponse<T> = response.into_json().map_err(|e| LedgerError::Rpc {
            method: method.to_string(),
            code: 0,
            message: format!("malformed response: {e}"),
        })?;

        if let Some(err) = parsed.error {
            return Err(LedgerError::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        parsed.result.ok_or_else(|| LedgerError::Rpc {
            method: method.to_string(),
            code: 0,
            message: "response has neither result nor error".into(),
        })
    }

    fn commitment_param(&self) -> Value {
        json!({ "commitment": self.commitment.as_str() })
    }

    fn latest_blockhash(&self) -> Result<[u8; 32], LedgerError> {
        let info: WithContext<BlockhashInfo> =
            self.call("getLatestBlockhash", json!([self.commitment_param()]))?;
        address_to_bytes(&info.value.blockhash)
            .map_err(|e| LedgerError::Submission(format!("bad blockhash: {e}")))
    }

    fn signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, LedgerError> {
        let statuses: WithContext<Vec<Option<SignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": true }]),
            )
            .map_err(|e| categorize(e, LedgerError::Confirmation))?;
        Ok(statuses.value.into_iter().next().flatten())
    }

    /// Poll until `signature` reaches the configured commitment, fails, or
    /// the confirmation deadline passes.
    fn wait_for_confirmation(&self, signature: &str) -> Result<(), LedgerError> {
        let started = Instant::now();
        loop {
            if let Some(status) = self.signature_status(signature)? {
                if let Some(err) = status.err {
                    return Err(LedgerError::TransactionFailed {
                        signature: signature.to_string(),
                        reason: err.to_string(),
                    });
                }
                // Nodes omit the status once a transaction is rooted.
                let reached = status.confirmation_status.unwrap_or(Commitment::Finalized);
                if reached >= self.commitment {
                    debug!(signature, %reached, "confirmed");
                    return Ok(());
                }
            }

            let waited = started.elapsed();
            if waited >= self.confirm_timeout {
                return Err(LedgerError::ConfirmationTimeout {
                    signature: signature.to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Re-label RPC-level failures with the lifecycle step they happened in;
/// transport failures stay connection errors.
fn categorize(err: LedgerError, step: fn(String) -> LedgerError) -> LedgerError {
    match err {
        LedgerError::Rpc { .. } => step(err.to_string()),
        other => other,
    }
}

impl LedgerClient for RpcLedgerClient {
    fn cluster_version(&self) -> Result<String, LedgerError> {
        let version: Value = self.call("getVersion", json!([]))?;
        Ok(version
            .get("solana-core")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, LedgerError> {
        let balance: WithContext<u64> = self.call(
            "getBalance",
            json!([bytes_to_address(pubkey), self.commitment_param()]),
        )?;
        Ok(balance.value)
    }

    fn minimum_balance_for_rent_exemption(&self, size: usize) -> Result<u64, LedgerError> {
        self.call(
            "getMinimumBalanceForRentExemption",
            json!([size, self.commitment_param()]),
        )
        .map_err(|e| categorize(e, LedgerError::RentQuery))
    }

    fn request_airdrop(&self, pubkey: &Pubkey, lamports: u64) -> Result<String, LedgerError> {
        let signature: String = self
            .call(
                "requestAirdrop",
                json!([bytes_to_address(pubkey), lamports, self.commitment_param()]),
            )
            .map_err(|e| categorize(e, LedgerError::Airdrop))?;
        info!(%signature, lamports, "airdrop requested");
        self.wait_for_confirmation(&signature)?;
        Ok(signature)
    }

    fn submit_and_confirm(
        &self,
        transaction: &Transaction,
        signers: &[&Keypair],
    ) -> Result<String, LedgerError> {
        let blockhash = self
            .latest_blockhash()
            .map_err(|e| categorize(e, LedgerError::Submission))?;
        let compiled = compile_transaction(&transaction.instructions, &transaction.fee_payer, &blockhash)?;
        let signed = sign_transaction(&compiled, signers)?;

        let signature: String = self
            .call(
                "sendTransaction",
                json!([
                    bs58::encode(&signed.wire).into_string(),
                    { "encoding": "base58", "preflightCommitment": self.commitment.as_str() }
                ]),
            )
            .map_err(|e| categorize(e, LedgerError::Submission))?;
        debug!(%signature, bytes = signed.wire.len(), "transaction sent");

        self.wait_for_confirmation(&signature)?;
        Ok(signature)
    }
}
