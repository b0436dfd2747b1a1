//! Ledger access
//!
//! [`LedgerClient`] is the only way the launch pipeline talks to Solana.
//! [`RpcLedger`] implements it over the nonblocking RPC client; tests use an
//! in-memory ledger.

pub mod errors;
pub mod rpc;
pub mod sender;

pub use errors::LedgerError;
pub use rpc::RpcLedger;
pub use sender::{send_and_confirm, SendError, SendOptions};

use async_trait::async_trait;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Recent blockhash and the last block height at which it is still valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Status of a signature as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureState {
    /// Unknown to the node or below the configured commitment
    Pending,
    Confirmed,
    /// Landed with an execution error
    Failed(String),
}

/// Terminal result of polling a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Rejected(String),
    /// The deadline passed without a terminal state; the transaction may still land
    TimedOut,
}

/// Interval between confirmation polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError>;

    async fn get_latest_checkpoint(&self) -> Result<Checkpoint, LedgerError>;

    async fn get_slot(&self) -> Result<u64, LedgerError>;

    async fn block_height(&self) -> Result<u64, LedgerError>;

    /// Submit a signed transaction, returning its first signature
    async fn submit(&self, tx: &VersionedTransaction) -> Result<Signature, LedgerError>;

    async fn signature_state(&self, signature: &Signature) -> Result<SignatureState, LedgerError>;

    /// Raw account data, or `None` when the account does not exist
    async fn read_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Poll `signature` until it reaches a terminal state or `timeout` elapses.
    ///
    /// A signature still pending once the block height has passed the
    /// checkpoint's `last_valid_block_height` can no longer land and is
    /// reported as rejected. Read errors while polling are logged and polled
    /// through; they never end the wait early.
    async fn confirm(
        &self,
        signature: &Signature,
        checkpoint: &Checkpoint,
        timeout: Duration,
    ) -> Result<Confirmation, LedgerError> {
        let deadline = Instant::now() + timeout;
        let interval = self.poll_interval();

        loop {
            match self.signature_state(signature).await {
                Ok(SignatureState::Confirmed) => return Ok(Confirmation::Confirmed),
                Ok(SignatureState::Failed(reason)) => return Ok(Confirmation::Rejected(reason)),
                Ok(SignatureState::Pending) => match self.block_height().await {
                    Ok(height) if height > checkpoint.last_valid_block_height => {
                        // Last look: it may have landed right at the boundary
                        return match self.signature_state(signature).await {
                            Ok(SignatureState::Confirmed) => Ok(Confirmation::Confirmed),
                            Ok(SignatureState::Failed(reason)) => Ok(Confirmation::Rejected(reason)),
                            _ => Ok(Confirmation::Rejected("checkpoint expired".to_string())),
                        };
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Block height read failed while confirming"),
                },
                Err(e) if e.is_retryable() => {
                    debug!(signature = %signature, error = %e, "Status poll failed, polling again")
                }
                Err(e) => {
                    warn!(signature = %signature, error = %e, "Status poll failed permanently");
                    return Err(e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Confirmation::TimedOut);
            }
            sleep(interval.min(deadline - now)).await;
        }
    }
}
