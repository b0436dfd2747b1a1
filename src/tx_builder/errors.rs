//! Error types for packing and bundle submission
//!
//! Packing errors are structural and never retried. Bundle errors separate
//! the three ways a submission can end without a confirmed signature:
//! - nobody accepted it (nothing reached the ledger, safe to resubmit)
//! - the ledger refused it
//! - the wait ran out (ambiguous, the bundle may still land)

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::time::Duration;
use thiserror::Error;

use crate::ledger::LedgerError;

/// Errors raised while partitioning, compiling or signing transaction groups
#[derive(Error, Debug, Clone)]
pub enum PackError {
    /// A single operation does not fit an empty group
    ///
    /// Splitting an operation across transactions would break its atomicity,
    /// so this is reported rather than worked around.
    #[error(
        "Operation {operation} alone exceeds group ceilings \
         (size {size}/{max_size} bytes, compute {compute_units}/{max_compute_units} units)"
    )]
    GroupSizeExceeded {
        /// Index of the operation in the input list
        operation: usize,
        size: usize,
        max_size: usize,
        compute_units: u32,
        max_compute_units: u32,
    },

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild {
        /// The program ID that failed to build an instruction
        program: String,
        /// Detailed reason for the failure
        reason: String,
    },

    /// A required signer has no key in the keyring
    #[error("Missing signer: {0}")]
    MissingSigner(Pubkey),

    /// Message compilation failed (for example too many account keys)
    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// Compute budget header missing, duplicated or out of place
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PackError {
    /// Packing errors are deterministic: repacking the same input fails the same way
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::GroupSizeExceeded { .. } => "ceiling",
            Self::InstructionBuild { .. } => "instruction",
            Self::MissingSigner(_) | Self::Signing(_) => "signing",
            Self::Compile(_) | Self::Serialization(_) => "compile",
            Self::InvalidInstructionOrder(_) => "validation",
            Self::Configuration(_) => "config",
        }
    }

    /// Create an instruction build error for a specific program
    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid instruction order error
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }
}

/// Outcome errors of a bundle submission
#[derive(Error, Debug, Clone)]
pub enum BundleError {
    #[error("Bundle is empty")]
    Empty,

    #[error("Bundle has {count} transactions, relays accept at most {max}")]
    TooManyTransactions { count: usize, max: usize },

    #[error("Bundle serialization failed: {0}")]
    Serialization(String),

    /// Every relay failed; the ledger was never polled
    #[error("No relay accepted the bundle ({} endpoints failed)", .errors.len())]
    NoRelayAccepted {
        /// `(endpoint, error)` per relay
        errors: Vec<(String, String)>,
    },

    /// The ledger reported the representative transaction as failed or expired
    #[error("Bundle rejected (signature {signature}): {reason}")]
    BundleRejected { signature: Signature, reason: String },

    /// No terminal state before the deadline; the bundle may still land
    #[error("Bundle not confirmed within {waited:?} (signature {signature})")]
    BundleTimeout { signature: Signature, waited: Duration },

    /// Confirmation polling hit a non-retryable ledger error
    #[error("Ledger error while confirming {signature}: {source}")]
    Ledger {
        signature: Signature,
        #[source]
        source: LedgerError,
    },
}

impl BundleError {
    /// Only a bundle nobody accepted is safe to resubmit as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoRelayAccepted { .. })
    }

    /// A timed-out bundle may still land; re-poll before resubmitting
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::BundleTimeout { .. } | Self::Ledger { .. })
    }

    /// Representative signature, when the bundle got far enough to have one observed
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Self::BundleRejected { signature, .. }
            | Self::BundleTimeout { signature, .. }
            | Self::Ledger { signature, .. } => Some(signature),
            _ => None,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Empty | Self::TooManyTransactions { .. } | Self::Serialization(_) => "build",
            Self::NoRelayAccepted { .. } => "relay",
            Self::BundleRejected { .. } => "rejected",
            Self::BundleTimeout { .. } => "timeout",
            Self::Ledger { .. } => "ledger",
        }
    }
}
