//! Transaction building: descriptors, packing, signing and bundles
//!
//! ## Architecture
//!
//! - **operation**: typed descriptors with derived signer and account sets
//! - **encoder**: launchpad instruction encoding behind a trait
//! - **instructions**: compute budget headers and ordering checks
//! - **message**: v0 compilation against lookup tables, sizing, signing
//! - **packer**: deterministic partition into size and compute bounded groups
//! - **bundle**: multi-relay submission with confirmation polling
//! - **errors**: `PackError` and `BundleError`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use launch_bundler::tx_builder::{PackerConfig, TransactionPacker};
//! # use launch_bundler::{identity::Keyring, tx_builder::OperationDescriptor};
//! # use solana_sdk::{address_lookup_table::AddressLookupTableAccount, hash::Hash};
//! # fn example(ops: Vec<OperationDescriptor>, table: AddressLookupTableAccount, keyring: Keyring)
//! #     -> Result<(), launch_bundler::tx_builder::PackError> {
//! let packer = TransactionPacker::new(PackerConfig::default())?;
//! let groups = packer.pack(&ops, |op| *op.owner(), &[table], Hash::default(), &keyring)?;
//! assert!(groups.iter().all(|g| g.size <= 1232));
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod encoder;
pub mod errors;
pub mod instructions;
pub mod message;
pub mod operation;
pub mod packer;

pub use bundle::{Bundle, BundleSubmitter, MAX_BUNDLE_TRANSACTIONS};
pub use encoder::{InstructionEncoder, LaunchMetadata, LaunchpadEncoder};
pub use errors::{BundleError, PackError};
pub use operation::OperationDescriptor;
pub use packer::{GroupPlan, PackerConfig, TransactionGroup, TransactionPacker, MAX_TRANSACTION_SIZE};
