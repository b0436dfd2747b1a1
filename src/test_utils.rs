//! Test Utilities Module
//!
//! Synthetic operation fixtures for packer tests and benches. Only compiled
//! when running tests or when the `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::tx_builder::OperationDescriptor;

/// Program id shared by every synthetic operation
pub const SYNTHETIC_PROGRAM: Pubkey = Pubkey::new_from_array([7u8; 32]);

/// `n` operations owned by `owner`, each one instruction carrying `data_len`
/// bytes of payload and touching one fresh writable account.
pub fn synthetic_operations(owner: &Pubkey, n: usize, data_len: usize, compute_units: u32) -> Vec<OperationDescriptor> {
    (0..n)
        .map(|i| {
            let ix = Instruction::new_with_bytes(
                SYNTHETIC_PROGRAM,
                &vec![(i % 251) as u8; data_len],
                vec![
                    AccountMeta::new(*owner, true),
                    AccountMeta::new(Pubkey::new_unique(), false),
                ],
            );
            OperationDescriptor::new(*owner, vec![ix], compute_units)
        })
        .collect()
}

/// A lookup table holding every non-signer account the operations touch
pub fn table_for(operations: &[OperationDescriptor]) -> AddressLookupTableAccount {
    let mut addresses = Vec::new();
    for op in operations {
        for account in op.accounts() {
            if !op.signers().contains(account) && !addresses.contains(account) {
                addresses.push(*account);
            }
        }
    }
    AddressLookupTableAccount {
        key: Pubkey::new_from_array([9u8; 32]),
        addresses,
    }
}
