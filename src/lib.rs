//! Launch Bundler Library
//!
//! Coordinates a multi-identity token launch on Solana: funds a pool of
//! ephemeral identities, registers their accounts in an address lookup
//! table, packs their buy operations into size-bounded v0 transactions and
//! submits the result as one Jito bundle.
//!
//! ## Layout
//!
//! - **identity / keystore**: key generation and append-only key files
//! - **distributor**: single-transaction capital fan-out with bounded retry
//! - **lookup_table**: table creation and strictly sequential extension
//! - **tx_builder**: operation descriptors, packing, signing and bundles
//! - **relay / metadata**: HTTP adapters for block engines and storage
//! - **orchestrator**: the run sequence and its typed failures

pub mod config;
pub mod distributor;
pub mod identity;
pub mod keystore;
pub mod ledger;
pub mod lookup_table;
pub mod metadata;
pub mod metrics;
pub mod observability;
pub mod orchestrator;
pub mod relay;
pub mod retry;
pub mod structured_logging;
pub mod tx_builder;

pub mod test_utils;

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
