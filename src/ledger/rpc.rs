//! Solana JSON-RPC ledger client

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{
    commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, warn};

use super::{Checkpoint, LedgerClient, LedgerError, SignatureState};
use crate::config::RpcConfig;

/// [`LedgerClient`] backed by a Solana JSON-RPC node
#[derive(Clone)]
pub struct RpcLedger {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcLedger {
    pub fn new(config: &RpcConfig) -> Self {
        let commitment = CommitmentConfig::from_str(&config.commitment).unwrap_or_else(|_| {
            warn!(commitment = %config.commitment, "Unknown commitment, using confirmed");
            CommitmentConfig::confirmed()
        });
        let client = RpcClient::new_with_timeout_and_commitment(
            config.url.clone(),
            Duration::from_secs(config.timeout_secs),
            commitment,
        );
        Self {
            client: Arc::new(client),
            commitment,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError> {
        let response = self
            .client
            .get_balance_with_commitment(address, self.commitment)
            .await?;
        Ok(response.value)
    }

    async fn get_latest_checkpoint(&self) -> Result<Checkpoint, LedgerError> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await?;
        Ok(Checkpoint {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn get_slot(&self) -> Result<u64, LedgerError> {
        Ok(self.client.get_slot_with_commitment(self.commitment).await?)
    }

    async fn block_height(&self) -> Result<u64, LedgerError> {
        Ok(self.client.get_block_height_with_commitment(self.commitment).await?)
    }

    async fn submit(&self, tx: &VersionedTransaction) -> Result<Signature, LedgerError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment.commitment),
            encoding: None,
            max_retries: Some(0),
            min_context_slot: None,
        };
        let signature = self.client.send_transaction_with_config(tx, config).await?;
        debug!(signature = %signature, "Transaction submitted");
        Ok(signature)
    }

    async fn signature_state(&self, signature: &Signature) -> Result<SignatureState, LedgerError> {
        let response = self.client.get_signature_statuses(&[*signature]).await?;
        let state = match response.value.into_iter().next().flatten() {
            None => SignatureState::Pending,
            Some(status) => match status.err {
                Some(err) => SignatureState::Failed(err.to_string()),
                None if status.satisfies_commitment(self.commitment) => SignatureState::Confirmed,
                None => SignatureState::Pending,
            },
        };
        Ok(state)
    }

    async fn read_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await?;
        Ok(response.value.map(|account| account.data))
    }
}
