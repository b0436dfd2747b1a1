//! Typed operation descriptors

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::collections::BTreeSet;

/// One semantic operation: an ordered instruction list that must land in the
/// same transaction, plus what it touches and who must sign it.
///
/// Signers and accounts are derived from the instruction metas, so they
/// always agree with what the ledger will demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    owner: Pubkey,
    instructions: Vec<Instruction>,
    compute_units: u32,
    signers: BTreeSet<Pubkey>,
    accounts: BTreeSet<Pubkey>,
}

impl OperationDescriptor {
    /// `owner` is the identity the operation belongs to; if it opens a group
    /// it becomes that group's fee payer.
    pub fn new(owner: Pubkey, instructions: Vec<Instruction>, compute_units: u32) -> Self {
        let mut signers = BTreeSet::new();
        let mut accounts = BTreeSet::new();
        signers.insert(owner);

        for ix in &instructions {
            for meta in &ix.accounts {
                accounts.insert(meta.pubkey);
                if meta.is_signer {
                    signers.insert(meta.pubkey);
                }
            }
        }

        Self {
            owner,
            instructions,
            compute_units,
            signers,
            accounts,
        }
    }

    pub fn owner(&self) -> &Pubkey {
        &self.owner
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn compute_units(&self) -> u32 {
        self.compute_units
    }

    /// Identities whose signatures the operation needs, owner included
    pub fn signers(&self) -> &BTreeSet<Pubkey> {
        &self.signers
    }

    /// Every account the operation reads or writes
    pub fn accounts(&self) -> &BTreeSet<Pubkey> {
        &self.accounts
    }

    /// Append an instruction to the operation (for example a relay tip)
    pub fn push(&mut self, ix: Instruction, compute_units: u32) {
        for meta in &ix.accounts {
            self.accounts.insert(meta.pubkey);
            if meta.is_signer {
                self.signers.insert(meta.pubkey);
            }
        }
        self.compute_units = self.compute_units.saturating_add(compute_units);
        self.instructions.push(ix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{instruction::AccountMeta, system_instruction};

    #[test]
    fn test_signers_derived_from_metas() {
        let owner = Pubkey::new_unique();
        let cosigner = Pubkey::new_unique();
        let readonly = Pubkey::new_unique();
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[9],
            vec![
                AccountMeta::new(cosigner, true),
                AccountMeta::new_readonly(readonly, false),
            ],
        );

        let op = OperationDescriptor::new(owner, vec![ix], 10_000);
        assert_eq!(op.signers().len(), 2);
        assert!(op.signers().contains(&owner));
        assert!(op.signers().contains(&cosigner));
        assert!(op.accounts().contains(&readonly));
        assert!(!op.signers().contains(&readonly));
    }

    #[test]
    fn test_push_accumulates() {
        let owner = Pubkey::new_unique();
        let mut op = OperationDescriptor::new(owner, vec![], 100);
        op.push(system_instruction::transfer(&owner, &Pubkey::new_unique(), 5), 300);
        assert_eq!(op.instructions().len(), 1);
        assert_eq!(op.compute_units(), 400);
        assert_eq!(op.accounts().len(), 2);
    }
}
