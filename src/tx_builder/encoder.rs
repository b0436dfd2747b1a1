//! Instruction encoding for the launchpad program
//!
//! The pipeline never interprets instruction contents; it only needs
//! descriptors. [`LaunchpadEncoder`] produces them for an Anchor-style
//! launchpad whose program id, discriminators and fixed accounts come from
//! configuration. Curve math and PDA derivation stay outside this crate.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_instruction, system_program, sysvar,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use std::str::FromStr;

use crate::config::{PackingConfig, ProtocolConfig};
use crate::tx_builder::errors::PackError;
use crate::tx_builder::operation::OperationDescriptor;

/// Token name, symbol and metadata URI passed to the create instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchMetadata {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

/// Turns economic parameters into operation descriptors. Pure: no I/O.
pub trait InstructionEncoder: Send + Sync {
    /// Operations that create the token, owned by `creator`
    fn launch_operations(
        &self,
        creator: &Pubkey,
        mint: &Pubkey,
        metadata: &LaunchMetadata,
    ) -> Result<Vec<OperationDescriptor>, PackError>;

    /// One identity's buy of `lamports` worth of the token
    fn buy_operation(&self, buyer: &Pubkey, mint: &Pubkey, lamports: u64) -> Result<OperationDescriptor, PackError>;

    /// Static addresses every buy references, for the lookup table
    fn shared_addresses(&self, creator: &Pubkey, mint: &Pubkey) -> Vec<Pubkey>;

    fn token_account(&self, owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        get_associated_token_address(owner, mint)
    }

    fn wrapped_native_account(&self, owner: &Pubkey) -> Pubkey {
        get_associated_token_address(owner, &spl_token::native_mint::id())
    }
}

/// Config-driven encoder for an Anchor-style launchpad
#[derive(Debug, Clone)]
pub struct LaunchpadEncoder {
    program_id: Pubkey,
    create_discriminator: [u8; 8],
    buy_discriminator: [u8; 8],
    readonly_accounts: Vec<Pubkey>,
    writable_accounts: Vec<Pubkey>,
    minimum_out: u64,
    launch_compute_units: u32,
    buy_compute_units: u32,
}

impl LaunchpadEncoder {
    pub fn from_config(protocol: &ProtocolConfig, packing: &PackingConfig) -> Result<Self, PackError> {
        let program_id = Pubkey::from_str(&protocol.program_id)
            .map_err(|e| PackError::instruction_failed(&protocol.program_id, format!("invalid program id: {e}")))?;

        let discriminator = |bytes: &[u8], which: &str| -> Result<[u8; 8], PackError> {
            <[u8; 8]>::try_from(bytes).map_err(|_| {
                PackError::instruction_failed(
                    program_id.to_string(),
                    format!("{which} discriminator must be 8 bytes, got {}", bytes.len()),
                )
            })
        };

        let parse_all = |list: &[String]| -> Result<Vec<Pubkey>, PackError> {
            list.iter()
                .map(|s| {
                    Pubkey::from_str(s).map_err(|e| {
                        PackError::instruction_failed(program_id.to_string(), format!("invalid account {s}: {e}"))
                    })
                })
                .collect()
        };

        Ok(Self {
            program_id,
            create_discriminator: discriminator(&protocol.create_discriminator, "create")?,
            buy_discriminator: discriminator(&protocol.buy_discriminator, "buy")?,
            readonly_accounts: parse_all(&protocol.readonly_accounts)?,
            writable_accounts: parse_all(&protocol.writable_accounts)?,
            minimum_out: protocol.minimum_out,
            launch_compute_units: packing.launch_compute_units,
            buy_compute_units: packing.buy_compute_units,
        })
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    fn protocol_metas(&self) -> impl Iterator<Item = AccountMeta> + '_ {
        self.readonly_accounts
            .iter()
            .map(|a| AccountMeta::new_readonly(*a, false))
            .chain(self.writable_accounts.iter().map(|a| AccountMeta::new(*a, false)))
    }

    fn create_instruction(&self, creator: &Pubkey, mint: &Pubkey, metadata: &LaunchMetadata) -> Instruction {
        let mut data = Vec::with_capacity(8 + 12 + metadata.name.len() + metadata.symbol.len() + metadata.uri.len());
        data.extend_from_slice(&self.create_discriminator);
        put_string(&mut data, &metadata.name);
        put_string(&mut data, &metadata.symbol);
        put_string(&mut data, &metadata.uri);

        let mut accounts = vec![AccountMeta::new(*creator, true), AccountMeta::new(*mint, true)];
        accounts.extend(self.protocol_metas());
        accounts.extend([
            AccountMeta::new_readonly(spl_token::native_mint::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ]);

        Instruction::new_with_bytes(self.program_id, &data, accounts)
    }

    fn buy_instruction(&self, buyer: &Pubkey, mint: &Pubkey, token_ata: Pubkey, wsol_ata: Pubkey, lamports: u64) -> Instruction {
        let mut data = Vec::with_capacity(24);
        data.extend_from_slice(&self.buy_discriminator);
        data.extend_from_slice(&lamports.to_le_bytes());
        data.extend_from_slice(&self.minimum_out.to_le_bytes());

        let mut accounts = vec![AccountMeta::new(*buyer, true)];
        accounts.extend(self.protocol_metas());
        accounts.extend([
            AccountMeta::new(token_ata, false),
            AccountMeta::new(wsol_ata, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(spl_token::native_mint::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
        ]);

        Instruction::new_with_bytes(self.program_id, &data, accounts)
    }
}

/// Borsh string: u32 little-endian length, then UTF-8 bytes
fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

impl InstructionEncoder for LaunchpadEncoder {
    fn launch_operations(
        &self,
        creator: &Pubkey,
        mint: &Pubkey,
        metadata: &LaunchMetadata,
    ) -> Result<Vec<OperationDescriptor>, PackError> {
        if metadata.name.is_empty() || metadata.symbol.is_empty() || metadata.uri.is_empty() {
            return Err(PackError::instruction_failed(
                self.program_id.to_string(),
                "token name, symbol and uri are required",
            ));
        }
        let create = self.create_instruction(creator, mint, metadata);
        Ok(vec![OperationDescriptor::new(*creator, vec![create], self.launch_compute_units)])
    }

    fn buy_operation(&self, buyer: &Pubkey, mint: &Pubkey, lamports: u64) -> Result<OperationDescriptor, PackError> {
        if lamports == 0 {
            return Err(PackError::instruction_failed(self.program_id.to_string(), "buy amount is zero"));
        }

        let native_mint = spl_token::native_mint::id();
        let token_ata = self.token_account(buyer, mint);
        let wsol_ata = self.wrapped_native_account(buyer);

        let sync = spl_token::instruction::sync_native(&spl_token::id(), &wsol_ata)
            .map_err(|e| PackError::instruction_failed(spl_token::id().to_string(), e.to_string()))?;

        let instructions = vec![
            create_associated_token_account_idempotent(buyer, buyer, mint, &spl_token::id()),
            create_associated_token_account_idempotent(buyer, buyer, &native_mint, &spl_token::id()),
            system_instruction::transfer(buyer, &wsol_ata, lamports),
            sync,
            self.buy_instruction(buyer, mint, token_ata, wsol_ata, lamports),
        ];

        Ok(OperationDescriptor::new(*buyer, instructions, self.buy_compute_units))
    }

    fn shared_addresses(&self, creator: &Pubkey, mint: &Pubkey) -> Vec<Pubkey> {
        let mut addresses = Vec::with_capacity(self.readonly_accounts.len() + self.writable_accounts.len() + 3);
        addresses.extend(self.readonly_accounts.iter().copied());
        addresses.extend(self.writable_accounts.iter().copied());
        addresses.extend([*mint, spl_token::native_mint::id(), *creator]);
        addresses
    }
}
