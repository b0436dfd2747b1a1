//! Atomic bundle submission across redundant relays
//!
//! The serialized bundle is posted to every relay at once. The first accept
//! starts confirmation polling while the other posts keep running; once
//! polling reaches a terminal state the stragglers are aborted. If every
//! relay fails, the ledger is never polled.

use solana_sdk::signature::Signature;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::ledger::{Checkpoint, Confirmation, LedgerClient};
use crate::metrics::{Metrics, Timer};
use crate::relay::{RelayAck, RelayChannel, RelayError};
use crate::tx_builder::errors::BundleError;
use crate::tx_builder::packer::TransactionGroup;

/// Block engines accept at most this many transactions per bundle
pub const MAX_BUNDLE_TRANSACTIONS: usize = 5;

/// Ordered transactions that must land together
#[derive(Debug, Clone)]
pub struct Bundle {
    groups: Vec<TransactionGroup>,
}

impl Bundle {
    pub fn new(groups: Vec<TransactionGroup>) -> Result<Self, BundleError> {
        if groups.is_empty() {
            return Err(BundleError::Empty);
        }
        if groups.len() > MAX_BUNDLE_TRANSACTIONS {
            return Err(BundleError::TooManyTransactions {
                count: groups.len(),
                max: MAX_BUNDLE_TRANSACTIONS,
            });
        }
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[TransactionGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Signature of the first transaction, which stands for the whole bundle
    pub fn representative_signature(&self) -> Signature {
        self.groups.first().map(|g| g.signature()).unwrap_or_default()
    }

    /// Serialize each transaction once, base58-encoded
    pub fn encode(&self) -> Result<Vec<String>, BundleError> {
        self.groups
            .iter()
            .map(|g| {
                bincode::serialize(&g.transaction)
                    .map(|bytes| bs58::encode(bytes).into_string())
                    .map_err(|e| BundleError::Serialization(e.to_string()))
            })
            .collect()
    }
}

/// Fans a bundle out to relays and waits for ledger confirmation
pub struct BundleSubmitter {
    relay: Arc<dyn RelayChannel>,
    ledger: Arc<dyn LedgerClient>,
    metrics: Option<Arc<Metrics>>,
}

impl BundleSubmitter {
    pub fn new(relay: Arc<dyn RelayChannel>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            relay,
            ledger,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record_post(&self, result: &Result<RelayAck, RelayError>) {
        if let Some(metrics) = &self.metrics {
            match result {
                Ok(_) => metrics.relay_accepts.inc(),
                Err(_) => metrics.relay_failures.inc(),
            }
        }
    }

    /// Submit `bundle` to every endpoint and confirm its first transaction.
    ///
    /// Returns the confirmed signature, or a [`BundleError`] telling apart
    /// "nobody accepted", "rejected" and "timed out".
    pub async fn submit(
        &self,
        bundle: &Bundle,
        endpoints: &[String],
        checkpoint: &Checkpoint,
        confirm_timeout: Duration,
    ) -> Result<Signature, BundleError> {
        let encoded = Arc::new(bundle.encode()?);
        let signature = bundle.representative_signature();

        let mut posts = JoinSet::new();
        for endpoint in endpoints {
            let relay = self.relay.clone();
            let encoded = encoded.clone();
            let endpoint = endpoint.clone();
            posts.spawn(async move {
                let result = relay.post(&endpoint, &encoded).await;
                (endpoint, result)
            });
        }

        let mut errors = Vec::new();
        let mut accepted = None;
        while let Some(joined) = posts.join_next().await {
            match joined {
                Ok((endpoint, result)) => {
                    self.record_post(&result);
                    match result {
                        Ok(ack) => {
                            accepted = Some(ack);
                            break;
                        }
                        Err(e) => {
                            warn!(endpoint = %endpoint, error = %e, "Relay post failed");
                            errors.push((endpoint, e.to_string()));
                        }
                    }
                }
                Err(e) => errors.push(("<task>".to_string(), e.to_string())),
            }
        }

        let Some(ack) = accepted else {
            warn!(endpoints = endpoints.len(), "No relay accepted the bundle");
            return Err(BundleError::NoRelayAccepted { errors });
        };

        info!(
            endpoint = %ack.endpoint,
            bundle_id = ?ack.bundle_id,
            signature = %signature,
            transactions = bundle.len(),
            "📦 Bundle accepted, confirming"
        );

        let timer = self.metrics.as_ref().map(|m| Timer::start(&m.confirmation_latency));
        let confirm = self.ledger.confirm(&signature, checkpoint, confirm_timeout);
        tokio::pin!(confirm);

        let outcome = loop {
            tokio::select! {
                outcome = &mut confirm => break outcome,
                Some(joined) = posts.join_next(), if !posts.is_empty() => {
                    if let Ok((endpoint, result)) = joined {
                        self.record_post(&result);
                        debug!(endpoint = %endpoint, accepted = result.is_ok(), "Late relay response");
                    }
                }
            }
        };
        posts.abort_all();
        if let Some(timer) = timer {
            timer.finish();
        }

        match outcome {
            Ok(Confirmation::Confirmed) => {
                info!(signature = %signature, "✅ Bundle confirmed");
                Ok(signature)
            }
            Ok(Confirmation::Rejected(reason)) => Err(BundleError::BundleRejected { signature, reason }),
            Ok(Confirmation::TimedOut) => Err(BundleError::BundleTimeout {
                signature,
                waited: confirm_timeout,
            }),
            Err(source) => Err(BundleError::Ledger { signature, source }),
        }
    }
}
