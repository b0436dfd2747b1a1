//! Capital distribution from the funding identity to ephemeral identities
//!
//! All transfers ride in one transaction, so a distribution either fully
//! applies or not at all. The funding precondition is checked before any
//! submission.

use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ledger::{send_and_confirm, LedgerClient, LedgerError, SendError, SendOptions, SignatureState};
use crate::metrics::Metrics;
use crate::retry::{retry_fixed, RetryError, RetryPolicy};

#[derive(Debug, Clone, Error)]
pub enum DistributionError {
    #[error("No identities to fund")]
    Empty,

    #[error("Insufficient funds: need {required} lamports, have {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Funding requirement overflows: {count} identities x {amount} lamports")]
    AmountOverflow { count: usize, amount: u64 },

    #[error("Distribution transaction is {size} bytes, ceiling is {max}")]
    TransactionTooLarge { size: usize, max: usize },

    #[error("Distribution failed after {attempts} attempts: {last_error}")]
    DistributionFailed {
        attempts: u32,
        last_signature: Option<Signature>,
        last_error: String,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl DistributionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DistributionError::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            DistributionError::Empty | DistributionError::AmountOverflow { .. } => "input",
            DistributionError::InsufficientFunds { .. } => "funds",
            DistributionError::TransactionTooLarge { .. } => "size",
            DistributionError::DistributionFailed { .. } => "exhausted",
            DistributionError::Ledger(_) => "ledger",
        }
    }

    /// Signature of the last attempt, when one was signed
    pub fn last_signature(&self) -> Option<Signature> {
        match self {
            DistributionError::DistributionFailed { last_signature, .. } => *last_signature,
            _ => None,
        }
    }
}

/// Lamports the funder must hold: `count * amount + reserve`
pub fn required_balance(count: usize, amount: u64, reserve: u64) -> Option<u64> {
    u64::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(amount))
        .and_then(|total| total.checked_add(reserve))
}

/// Pure funding precondition; never touches the ledger
pub fn check_funding(balance: u64, count: usize, amount: u64, reserve: u64) -> Result<u64, DistributionError> {
    let required = required_balance(count, amount, reserve).ok_or(DistributionError::AmountOverflow { count, amount })?;
    if balance < required {
        return Err(DistributionError::InsufficientFunds {
            required,
            available: balance,
        });
    }
    Ok(required)
}

/// One transfer of `amount` from `funder` to each recipient, in recipient order
pub fn transfer_instructions(funder: &Pubkey, recipients: &[Pubkey], amount: u64) -> Vec<Instruction> {
    recipients
        .iter()
        .map(|to| system_instruction::transfer(funder, to, amount))
        .collect()
}

pub struct CapitalDistributor {
    ledger: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
    options: SendOptions,
    fee_reserve: u64,
    metrics: Option<Arc<Metrics>>,
}

impl CapitalDistributor {
    pub fn new(ledger: Arc<dyn LedgerClient>, policy: RetryPolicy, options: SendOptions, fee_reserve: u64) -> Self {
        Self {
            ledger,
            policy,
            options,
            fee_reserve,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn fee_reserve(&self) -> u64 {
        self.fee_reserve
    }

    /// Read the funder's balance and check it covers `count` transfers of `amount`
    pub async fn check_balance(&self, funder: &Pubkey, count: usize, amount: u64) -> Result<u64, DistributionError> {
        let balance = self.ledger.get_balance(funder).await?;
        check_funding(balance, count, amount, self.fee_reserve)?;
        debug!(funder = %funder, balance, count, amount, "Funding precondition holds");
        Ok(balance)
    }

    /// Fund every identity with `amount` lamports in one atomic transaction.
    ///
    /// Rejections and timeouts are retried with a fresh checkpoint up to the
    /// policy bound. Before each retry the earlier attempts' signatures are
    /// checked, so a late-landing attempt is never funded twice.
    pub async fn distribute(
        &self,
        funder: &Keypair,
        identities: &[Pubkey],
        amount: u64,
    ) -> Result<Signature, DistributionError> {
        if identities.is_empty() {
            return Err(DistributionError::Empty);
        }
        let funder_address = funder.pubkey();
        self.check_balance(&funder_address, identities.len(), amount).await?;

        let instructions = transfer_instructions(&funder_address, identities, amount);
        let attempted: Mutex<Vec<Signature>> = Mutex::new(Vec::new());

        let result = retry_fixed("distribute", &self.policy, |attempt| {
            let instructions = &instructions;
            let attempted = &attempted;
            async move {
                if attempt > 1 {
                    let earlier = attempted.lock().await.clone();
                    if let Some(signature) = self.find_landed(&earlier).await {
                        info!(signature = %signature, "Earlier distribution attempt landed");
                        return Ok(signature);
                    }
                }
                if let Some(metrics) = &self.metrics {
                    metrics.distribution_attempts.inc();
                }
                match send_and_confirm(self.ledger.as_ref(), funder, &[], instructions, &self.options).await {
                    Ok(signature) => Ok(signature),
                    Err(e) => {
                        if let Some(signature) = e.signature() {
                            attempted.lock().await.push(signature);
                        }
                        Err(e)
                    }
                }
            }
        })
        .await;

        match result {
            Ok(signature) => {
                info!(
                    signature = %signature,
                    identities = identities.len(),
                    lamports_each = amount,
                    "💸 Capital distributed"
                );
                Ok(signature)
            }
            Err(RetryError::Permanent {
                error: SendError::TooLarge { size, max },
                ..
            }) => Err(DistributionError::TransactionTooLarge { size, max }),
            Err(err) => {
                let attempts = err.attempts();
                let last = err.into_inner();
                warn!(attempts, error = %last, "Distribution abandoned");
                Err(DistributionError::DistributionFailed {
                    attempts,
                    last_signature: last.signature(),
                    last_error: last.to_string(),
                })
            }
        }
    }

    async fn find_landed(&self, signatures: &[Signature]) -> Option<Signature> {
        for signature in signatures {
            match self.ledger.signature_state(signature).await {
                Ok(SignatureState::Confirmed) => return Some(*signature),
                Ok(_) => {}
                Err(e) => debug!(signature = %signature, error = %e, "Could not check earlier attempt"),
            }
        }
        None
    }
}
