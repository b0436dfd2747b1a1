//! v0 message compilation, sizing and signing helpers

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};

use crate::identity::Keyring;
use crate::tx_builder::errors::PackError;

/// Compile `instructions` into a v0 message, resolving non-signer accounts
/// through `tables` where possible.
pub fn compile_v0(
    payer: &Pubkey,
    instructions: &[Instruction],
    tables: &[AddressLookupTableAccount],
    blockhash: Hash,
) -> Result<v0::Message, PackError> {
    v0::Message::try_compile(payer, instructions, tables, blockhash).map_err(|e| PackError::Compile(e.to_string()))
}

/// Addresses whose signatures the message requires, fee payer first
pub fn required_signers(message: &v0::Message) -> &[Pubkey] {
    let n = message.header.num_required_signatures as usize;
    &message.account_keys[..n.min(message.account_keys.len())]
}

/// Serialized size of the transaction carrying `message` once fully signed
pub fn signed_size(message: &v0::Message) -> Result<usize, PackError> {
    let placeholder = VersionedTransaction {
        signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
        message: VersionedMessage::V0(message.clone()),
    };
    transaction_size(&placeholder)
}

/// Serialized size of a transaction in bytes
pub fn transaction_size(tx: &VersionedTransaction) -> Result<usize, PackError> {
    bincode::serialized_size(tx)
        .map(|n| n as usize)
        .map_err(|e| PackError::Serialization(e.to_string()))
}

/// Sign `message` with exactly its required signers, taken from `keyring`
pub fn sign_with_keyring(message: v0::Message, keyring: &Keyring) -> Result<VersionedTransaction, PackError> {
    let signers = required_signers(&message)
        .iter()
        .map(|address| keyring.get(address).ok_or(PackError::MissingSigner(*address)))
        .collect::<Result<Vec<&Keypair>, _>>()?;

    VersionedTransaction::try_new(VersionedMessage::V0(message), signers.as_slice())
        .map_err(|e| PackError::Signing(e.to_string()))
}

/// Sign `message` with the given keys; keys the message does not require are skipped
pub fn sign_with(message: v0::Message, keys: &[&Keypair]) -> Result<VersionedTransaction, PackError> {
    let signers = required_signers(&message)
        .iter()
        .map(|address| {
            keys.iter()
                .copied()
                .find(|k| k.pubkey() == *address)
                .ok_or(PackError::MissingSigner(*address))
        })
        .collect::<Result<Vec<&Keypair>, _>>()?;

    VersionedTransaction::try_new(VersionedMessage::V0(message), signers.as_slice())
        .map_err(|e| PackError::Signing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{instruction::AccountMeta, system_instruction};
    use std::sync::Arc;

    #[test]
    fn test_signed_size_matches_real_transaction() {
        let payer = Keypair::new();
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let message = compile_v0(&payer.pubkey(), &[ix], &[], Hash::new_unique()).unwrap();

        let estimated = signed_size(&message).unwrap();
        let tx = sign_with(message, &[&payer]).unwrap();
        assert_eq!(estimated, transaction_size(&tx).unwrap());
    }

    #[test]
    fn test_table_shrinks_message() {
        let payer = Keypair::new();
        let program = Pubkey::new_unique();
        let accounts: Vec<Pubkey> = (0..20).map(|_| Pubkey::new_unique()).collect();
        let ix = Instruction::new_with_bytes(
            program,
            &[0],
            accounts.iter().map(|a| AccountMeta::new(*a, false)).collect(),
        );
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: accounts.clone(),
        };

        let plain = compile_v0(&payer.pubkey(), &[ix.clone()], &[], Hash::default()).unwrap();
        let compact = compile_v0(&payer.pubkey(), &[ix], &[table], Hash::default()).unwrap();
        assert!(signed_size(&compact).unwrap() + 20 * 30 < signed_size(&plain).unwrap());
    }

    #[test]
    fn test_sign_requires_every_signer() {
        let payer = Keypair::new();
        let other = Arc::new(Keypair::new());
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[],
            vec![AccountMeta::new(other.pubkey(), true)],
        );
        let message = compile_v0(&payer.pubkey(), &[ix], &[], Hash::default()).unwrap();
        assert_eq!(required_signers(&message).len(), 2);

        let mut keyring = Keyring::new();
        keyring.insert(Arc::new(payer.insecure_clone()));
        let err = sign_with_keyring(message.clone(), &keyring).unwrap_err();
        assert!(matches!(err, PackError::MissingSigner(k) if k == other.pubkey()));

        keyring.insert(other);
        let tx = sign_with_keyring(message, &keyring).unwrap();
        assert_eq!(tx.signatures.len(), 2);
        assert!(tx.verify_with_results().iter().all(|ok| *ok));
    }
}
