//! Build, sign, submit and confirm a single transaction
//!
//! Shared by the distributor and the table builder. One call is one attempt:
//! callers wrap it in [`crate::retry::retry_fixed`], and every attempt takes
//! a fresh checkpoint.

use solana_sdk::{
    instruction::Instruction,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::{Confirmation, LedgerClient, LedgerError};
use crate::retry::Transient;
use crate::tx_builder::instructions::with_header;
use crate::tx_builder::message::{compile_v0, sign_with, transaction_size};
use crate::tx_builder::packer::MAX_TRANSACTION_SIZE;

/// Compute budget and confirmation settings for one transaction
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    pub compute_units: u32,
    pub compute_unit_price: u64,
    pub confirm_timeout: Duration,
    pub max_tx_size: usize,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            compute_units: 200_000,
            compute_unit_price: 0,
            confirm_timeout: Duration::from_secs(60),
            max_tx_size: MAX_TRANSACTION_SIZE,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// The transaction could not be compiled or signed
    #[error("Build error: {0}")]
    Build(String),

    #[error("Transaction is {size} bytes, ceiling is {max}")]
    TooLarge { size: usize, max: usize },

    /// Reading the checkpoint or submitting failed
    #[error("Ledger error: {source}")]
    Ledger {
        signature: Option<Signature>,
        #[source]
        source: LedgerError,
    },

    #[error("Transaction {signature} rejected: {reason}")]
    Rejected { signature: Signature, reason: String },

    /// Not confirmed in time; it may still land
    #[error("Transaction {signature} not confirmed in time")]
    TimedOut { signature: Signature },
}

impl SendError {
    /// Signature of the attempt, if it got as far as signing
    pub fn signature(&self) -> Option<Signature> {
        match self {
            SendError::Ledger { signature, .. } => *signature,
            SendError::Rejected { signature, .. } | SendError::TimedOut { signature } => Some(*signature),
            _ => None,
        }
    }
}

impl Transient for SendError {
    fn is_transient(&self) -> bool {
        match self {
            SendError::Build(_) | SendError::TooLarge { .. } => false,
            SendError::Ledger { source, .. } => source.is_retryable(),
            // A rebuilt transaction with a fresh checkpoint may succeed
            SendError::Rejected { .. } | SendError::TimedOut { .. } => true,
        }
    }
}

/// Compile `instructions` behind a compute budget header with `payer` as fee
/// payer, sign with `payer` plus `extra_signers`, submit and confirm.
pub async fn send_and_confirm(
    ledger: &dyn LedgerClient,
    payer: &Keypair,
    extra_signers: &[&Keypair],
    instructions: &[Instruction],
    options: &SendOptions,
) -> Result<Signature, SendError> {
    let checkpoint = ledger
        .get_latest_checkpoint()
        .await
        .map_err(|source| SendError::Ledger { signature: None, source })?;

    let instructions = with_header(options.compute_units, options.compute_unit_price, instructions);
    let message = compile_v0(&payer.pubkey(), &instructions, &[], checkpoint.blockhash)
        .map_err(|e| SendError::Build(e.to_string()))?;

    let mut keys: Vec<&Keypair> = Vec::with_capacity(extra_signers.len() + 1);
    keys.push(payer);
    keys.extend(extra_signers.iter().copied());
    let tx = sign_with(message, &keys).map_err(|e| SendError::Build(e.to_string()))?;

    let size = transaction_size(&tx).map_err(|e| SendError::Build(e.to_string()))?;
    if size > options.max_tx_size {
        return Err(SendError::TooLarge {
            size,
            max: options.max_tx_size,
        });
    }

    let signature = tx.signatures[0];
    ledger.submit(&tx).await.map_err(|source| SendError::Ledger {
        signature: Some(signature),
        source,
    })?;
    debug!(signature = %signature, bytes = size, "Submitted, awaiting confirmation");

    match ledger.confirm(&signature, &checkpoint, options.confirm_timeout).await {
        Ok(Confirmation::Confirmed) => Ok(signature),
        Ok(Confirmation::Rejected(reason)) => Err(SendError::Rejected { signature, reason }),
        Ok(Confirmation::TimedOut) => Err(SendError::TimedOut { signature }),
        Err(source) => Err(SendError::Ledger {
            signature: Some(signature),
            source,
        }),
    }
}
