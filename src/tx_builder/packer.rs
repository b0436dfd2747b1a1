//! Deterministic packing of operations into bounded transaction groups
//!
//! Operations are consumed in input order. Each one joins the open group
//! unless that would break one of three ceilings:
//! - operation count (`group_size`)
//! - summed declared compute units
//! - serialized size of the fully signed transaction
//!
//! Size is measured by compiling the candidate group against the lookup
//! tables, so repeated accounts are charged as one-byte table indices. The
//! blockhash does not affect size, which keeps [`TransactionPacker::plan`]
//! pure: the same input always yields the same partition.

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use tracing::{debug, trace};

use crate::config::PackingConfig;
use crate::identity::Keyring;
use crate::tx_builder::errors::PackError;
use crate::tx_builder::instructions::{sanity_check_header, with_header};
use crate::tx_builder::message::{compile_v0, sign_with_keyring, signed_size};
use crate::tx_builder::operation::OperationDescriptor;

/// Solana's packet-bound transaction ceiling
pub const MAX_TRANSACTION_SIZE: usize = 1232;

/// Ceilings applied to every group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackerConfig {
    pub max_tx_size: usize,
    pub max_compute_units: u32,
    pub group_size: usize,
    pub compute_unit_price: u64,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            max_tx_size: MAX_TRANSACTION_SIZE,
            max_compute_units: 1_000_000,
            group_size: 5,
            compute_unit_price: 0,
        }
    }
}

impl From<&PackingConfig> for PackerConfig {
    fn from(cfg: &PackingConfig) -> Self {
        Self {
            max_tx_size: cfg.max_tx_size,
            max_compute_units: cfg.max_compute_units,
            group_size: cfg.group_size,
            compute_unit_price: cfg.compute_unit_price,
        }
    }
}

/// A sealed partition of the input: which operations, who pays, how big
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    /// Indices into the packed operation list, ascending and contiguous
    pub operations: Vec<usize>,
    pub fee_payer: Pubkey,
    pub compute_units: u32,
    /// Serialized size once signed
    pub size: usize,
}

/// A compiled, fully signed transaction ready for a bundle
#[derive(Debug, Clone)]
pub struct TransactionGroup {
    pub transaction: VersionedTransaction,
    pub fee_payer: Pubkey,
    pub operations: usize,
    pub compute_units: u32,
    pub size: usize,
}

impl TransactionGroup {
    /// The fee payer's signature, which identifies the transaction
    pub fn signature(&self) -> Signature {
        self.transaction.signatures.first().copied().unwrap_or_default()
    }
}

/// Accumulates operations for one group and validates ceilings on every push
struct GroupBuilder<'a> {
    config: &'a PackerConfig,
    tables: &'a [AddressLookupTableAccount],
    fee_payer: Option<Pubkey>,
    body: Vec<Instruction>,
    operations: Vec<usize>,
    compute_units: u32,
    size: usize,
}

impl<'a> GroupBuilder<'a> {
    fn new(config: &'a PackerConfig, tables: &'a [AddressLookupTableAccount]) -> Self {
        Self {
            config,
            tables,
            fee_payer: None,
            body: Vec::new(),
            operations: Vec::new(),
            compute_units: 0,
            size: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn measure(&self, fee_payer: &Pubkey, body: &[Instruction], compute_units: u32) -> Result<usize, PackError> {
        let instructions = with_header(compute_units, self.config.compute_unit_price, body);
        let message = compile_v0(fee_payer, &instructions, self.tables, Hash::default())?;
        signed_size(&message)
    }

    /// Add `op` if it fits. Returns `Ok(false)` when the group must be sealed
    /// first; an operation that does not fit an empty group is an error.
    fn try_push(&mut self, index: usize, op: &OperationDescriptor, fee_payer: Pubkey) -> Result<bool, PackError> {
        let payer = self.fee_payer.unwrap_or(fee_payer);
        let compute_units = self.compute_units.checked_add(op.compute_units());

        if !self.is_empty() && self.operations.len() >= self.config.group_size {
            return Ok(false);
        }

        let within_compute = matches!(compute_units, Some(units) if units <= self.config.max_compute_units);
        if !within_compute {
            if self.is_empty() {
                return Err(self.too_large(index, op, 0));
            }
            return Ok(false);
        }
        let compute_units = compute_units.unwrap_or(u32::MAX);

        let mut body = self.body.clone();
        body.extend_from_slice(op.instructions());

        let size = match self.measure(&payer, &body, compute_units) {
            Ok(size) => size,
            // Usually an account index overflow: the candidate touches too many keys
            Err(e) if !self.is_empty() => {
                trace!(operation = index, error = %e, "Candidate group failed to compile, sealing");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if size > self.config.max_tx_size {
            if self.is_empty() {
                return Err(self.too_large(index, op, size));
            }
            return Ok(false);
        }

        self.fee_payer = Some(payer);
        self.body = body;
        self.operations.push(index);
        self.compute_units = compute_units;
        self.size = size;
        Ok(true)
    }

    fn too_large(&self, index: usize, op: &OperationDescriptor, size: usize) -> PackError {
        PackError::GroupSizeExceeded {
            operation: index,
            size,
            max_size: self.config.max_tx_size,
            compute_units: op.compute_units(),
            max_compute_units: self.config.max_compute_units,
        }
    }

    fn seal(&mut self) -> Option<GroupPlan> {
        let fee_payer = self.fee_payer.take()?;
        let plan = GroupPlan {
            operations: std::mem::take(&mut self.operations),
            fee_payer,
            compute_units: self.compute_units,
            size: self.size,
        };
        self.body.clear();
        self.compute_units = 0;
        self.size = 0;
        Some(plan)
    }
}

/// Partitions operations into groups and compiles and signs them
#[derive(Debug, Clone)]
pub struct TransactionPacker {
    config: PackerConfig,
}

impl TransactionPacker {
    pub fn new(config: PackerConfig) -> Result<Self, PackError> {
        if config.group_size == 0 {
            return Err(PackError::Configuration("group_size must be at least 1".to_string()));
        }
        if config.max_tx_size == 0 || config.max_compute_units == 0 {
            return Err(PackError::Configuration("ceilings must be positive".to_string()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    /// Partition `operations` without compiling against a real checkpoint.
    ///
    /// Each group's fee payer is `fee_payer_of` applied to its first operation.
    pub fn plan<F>(
        &self,
        operations: &[OperationDescriptor],
        fee_payer_of: F,
        tables: &[AddressLookupTableAccount],
    ) -> Result<Vec<GroupPlan>, PackError>
    where
        F: Fn(&OperationDescriptor) -> Pubkey,
    {
        let mut plans = Vec::new();
        let mut builder = GroupBuilder::new(&self.config, tables);

        for (index, op) in operations.iter().enumerate() {
            if !builder.try_push(index, op, fee_payer_of(op))? {
                plans.extend(builder.seal());
                // A fresh group either takes the operation or reports it as oversized
                builder.try_push(index, op, fee_payer_of(op))?;
            }
        }
        plans.extend(builder.seal());

        Ok(plans)
    }

    /// Plan, then compile every group against `blockhash` and sign it with
    /// exactly the signers its message requires.
    pub fn pack<F>(
        &self,
        operations: &[OperationDescriptor],
        fee_payer_of: F,
        tables: &[AddressLookupTableAccount],
        blockhash: Hash,
        keyring: &Keyring,
    ) -> Result<Vec<TransactionGroup>, PackError>
    where
        F: Fn(&OperationDescriptor) -> Pubkey,
    {
        let plans = self.plan(operations, fee_payer_of, tables)?;
        let mut groups = Vec::with_capacity(plans.len());

        for (group_index, plan) in plans.into_iter().enumerate() {
            let body: Vec<Instruction> = plan
                .operations
                .iter()
                .flat_map(|&i| operations[i].instructions().iter().cloned())
                .collect();
            let instructions = with_header(plan.compute_units, self.config.compute_unit_price, &body);
            sanity_check_header(&instructions)?;

            let message = compile_v0(&plan.fee_payer, &instructions, tables, blockhash)?;
            let transaction = sign_with_keyring(message, keyring)?;

            debug!(
                group = group_index,
                operations = plan.operations.len(),
                fee_payer = %plan.fee_payer,
                compute_units = plan.compute_units,
                bytes = plan.size,
                signers = transaction.signatures.len(),
                "Transaction group signed"
            );

            groups.push(TransactionGroup {
                transaction,
                fee_payer: plan.fee_payer,
                operations: plan.operations.len(),
                compute_units: plan.compute_units,
                size: plan.size,
            });
        }

        Ok(groups)
    }
}
