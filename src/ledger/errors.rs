use solana_client::client_error::ClientError;
use thiserror::Error;

use crate::retry::Transient;

/// Ledger client error types
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Request timed out at the HTTP layer
    #[error("Request timed out")]
    Timeout,

    /// Error returned by the RPC node
    #[error("RPC response error: {message} (code: {code:?})")]
    RpcResponse { message: String, code: Option<i64> },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Blockhash not found")]
    BlockhashNotFound,

    #[error("Transaction expired")]
    TransactionExpired,

    /// Preflight simulation or node-side rejection of a submitted transaction
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Account data could not be decoded: {0}")]
    Decode(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Transport { .. } => true,
            LedgerError::Timeout => true,
            LedgerError::RateLimited => true,
            LedgerError::BlockhashNotFound => true,
            // A fresh checkpoint makes the rebuilt transaction valid again
            LedgerError::TransactionExpired => true,
            // Simulation can fail while a just-written account is still settling
            LedgerError::TransactionRejected(_) => true,

            LedgerError::InsufficientFunds => false,
            LedgerError::Decode(_) => false,
            LedgerError::Internal(_) => false,

            LedgerError::RpcResponse { code, .. } => matches!(code, Some(c) if (500..600).contains(c)),
        }
    }

    /// Short category name for logs and metrics labels
    pub fn category(&self) -> &'static str {
        match self {
            LedgerError::Transport { .. } | LedgerError::Timeout => "transport",
            LedgerError::RpcResponse { .. } | LedgerError::RateLimited => "rpc",
            LedgerError::BlockhashNotFound | LedgerError::TransactionExpired => "checkpoint",
            LedgerError::TransactionRejected(_) | LedgerError::InsufficientFunds => "transaction",
            LedgerError::Decode(_) => "decode",
            LedgerError::Internal(_) => "internal",
        }
    }

    /// Classify a solana client error by its message
    pub fn from_client_error(err: ClientError) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();

        if lower.contains("blockhash not found") {
            LedgerError::BlockhashNotFound
        } else if lower.contains("transaction expired") || lower.contains("block height exceeded") {
            LedgerError::TransactionExpired
        } else if lower.contains("insufficient funds") || lower.contains("insufficient lamports") {
            LedgerError::InsufficientFunds
        } else if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429") {
            LedgerError::RateLimited
        } else if lower.contains("timeout") || lower.contains("timed out") {
            LedgerError::Timeout
        } else if lower.contains("transaction simulation failed") || lower.contains("preflight") {
            LedgerError::TransactionRejected(message)
        } else if lower.contains("connection") || lower.contains("error sending request") {
            LedgerError::Transport { message }
        } else {
            let code = lower
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_matches(|c: char| !c.is_ascii_digit() && c != '-').parse::<i64>().ok());
            LedgerError::RpcResponse { message, code }
        }
    }
}

impl From<ClientError> for LedgerError {
    fn from(err: ClientError) -> Self {
        Self::from_client_error(err)
    }
}

impl Transient for LedgerError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(LedgerError::Transport { message: "reset".to_string() }.is_retryable());
        assert!(LedgerError::Timeout.is_retryable());
        assert!(LedgerError::BlockhashNotFound.is_retryable());
        assert!(!LedgerError::InsufficientFunds.is_retryable());
        assert!(!LedgerError::Decode("short".to_string()).is_retryable());
    }

    #[test]
    fn test_rpc_response_retry_by_code() {
        let server = LedgerError::RpcResponse { message: "busy".to_string(), code: Some(503) };
        let client = LedgerError::RpcResponse { message: "bad".to_string(), code: Some(-32602) };
        let unknown = LedgerError::RpcResponse { message: "?".to_string(), code: None };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(!unknown.is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(LedgerError::Timeout.category(), "transport");
        assert_eq!(LedgerError::TransactionExpired.category(), "checkpoint");
        assert_eq!(LedgerError::InsufficientFunds.category(), "transaction");
    }
}
