//! Jito block-engine relay channel and tip instruction
//!
//! Each endpoint is posted independently; there is no shared state between
//! posts, so the bundle submitter can fan out freely.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Published Jito tip accounts
pub const JITO_TIP_ACCOUNTS: [Pubkey; 8] = [
    solana_sdk::pubkey!("Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY"),
    solana_sdk::pubkey!("DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL"),
    solana_sdk::pubkey!("96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5"),
    solana_sdk::pubkey!("3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT"),
    solana_sdk::pubkey!("HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe"),
    solana_sdk::pubkey!("ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49"),
    solana_sdk::pubkey!("ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt"),
    solana_sdk::pubkey!("DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh"),
];

/// Pick one tip account at random
pub fn random_tip_account() -> Pubkey {
    JITO_TIP_ACCOUNTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(JITO_TIP_ACCOUNTS[0])
}

/// Transfer `lamports` from `payer` to a random tip account
pub fn tip_instruction(payer: &Pubkey, lamports: u64) -> Instruction {
    system_instruction::transfer(payer, &random_tip_account(), lamports)
}

#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Relay rejected bundle (code {code:?}): {message}")]
    Rpc { code: Option<i64>, message: String },

    #[error("Invalid relay response: {0}")]
    InvalidResponse(String),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Transport(_) => true,
            RelayError::Http { status, .. } => *status == 429 || *status >= 500,
            RelayError::Rpc { .. } => false,
            RelayError::InvalidResponse(_) => false,
        }
    }
}

/// A relay's acknowledgement of a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAck {
    pub endpoint: String,
    /// Bundle id echoed by the block engine, when it returns one
    pub bundle_id: Option<String>,
}

#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Post a bundle of base58-encoded transactions to one endpoint
    async fn post(&self, endpoint: &str, transactions: &[String]) -> Result<RelayAck, RelayError>;
}

/// `sendBundle` JSON-RPC client
#[derive(Debug, Clone)]
pub struct JitoRelay {
    client: reqwest::Client,
}

impl JitoRelay {
    pub fn new(timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RelayChannel for JitoRelay {
    async fn post(&self, endpoint: &str, transactions: &[String]) -> Result<RelayAck, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [transactions],
        });

        let response = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(RelayError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let value: Value = serde_json::from_str(&text).map_err(|e| RelayError::InvalidResponse(e.to_string()))?;
        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(RelayError::Rpc {
                code: err.get("code").and_then(Value::as_i64),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        let bundle_id = value.get("result").and_then(Value::as_str).map(str::to_string);
        debug!(endpoint = endpoint, bundle_id = ?bundle_id, "Relay accepted bundle");

        Ok(RelayAck {
            endpoint: endpoint.to_string(),
            bundle_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::system_program;

    #[test]
    fn test_tip_goes_to_known_account() {
        let payer = Pubkey::new_unique();
        for _ in 0..16 {
            let ix = tip_instruction(&payer, 1_000_000);
            assert_eq!(ix.program_id, system_program::id());
            assert_eq!(ix.accounts[0].pubkey, payer);
            assert!(ix.accounts[0].is_signer);
            assert!(JITO_TIP_ACCOUNTS.contains(&ix.accounts[1].pubkey));
        }
    }

    #[test]
    fn test_relay_error_retryability() {
        assert!(RelayError::Transport("reset".to_string()).is_retryable());
        assert!(RelayError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(RelayError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(!RelayError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!RelayError::Rpc { code: Some(-32602), message: "bad".to_string() }.is_retryable());
    }
}
