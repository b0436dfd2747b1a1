//! Shared address lookup table construction
//!
//! The funding identity creates one table per run and extends it in bounded
//! batches. Extensions take `&mut TableHandle`, so two extends of the same
//! table can never be in flight at once. Each batch has its own retry loop
//! and is followed by a settle delay before anything depends on its rows.

use solana_sdk::{
    address_lookup_table::{
        instruction::{create_lookup_table, extend_lookup_table},
        state::AddressLookupTable,
        AddressLookupTableAccount,
    },
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{RetryConfig, TableConfig};
use crate::keystore::{KeyStore, PersistenceError, TABLE_LABEL};
use crate::ledger::{send_and_confirm, LedgerClient, LedgerError, SendError, SendOptions};
use crate::metrics::Metrics;
use crate::retry::{retry_fixed, RetryPolicy, Transient};
use crate::tx_builder::encoder::InstructionEncoder;
use crate::tx_builder::packer::MAX_TRANSACTION_SIZE;

/// Hard capacity of an address lookup table
pub const MAX_TABLE_ADDRESSES: usize = 256;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Table creation failed after {attempts} attempts: {last_error}")]
    CreationFailed { attempts: u32, last_error: String },

    #[error("Extension at offset {offset} failed after {attempts} attempts: {last_error}")]
    ExtensionFailed {
        offset: usize,
        attempts: u32,
        last_signature: Option<Signature>,
        last_error: String,
    },

    #[error("Empty extension batch")]
    EmptyBatch,

    #[error("Batch of {len} addresses exceeds the per-call ceiling of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("Table holds {current} addresses; adding {requested} exceeds capacity {capacity}")]
    CapacityExceeded {
        current: usize,
        requested: usize,
        capacity: usize,
    },

    #[error("Table {table} is owned by {expected}, not {actual}")]
    AuthorityMismatch {
        table: Pubkey,
        expected: Pubkey,
        actual: Pubkey,
    },

    /// The table account is absent or shorter than the extensions made so far
    #[error("Table {0} is not visible yet")]
    NotReady(Pubkey),

    #[error("Table decode error: {0}")]
    Decode(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Could not record table address: {0}")]
    Persistence(#[from] PersistenceError),
}

impl TableError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TableError::NotReady(_) => true,
            TableError::Ledger(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            TableError::CreationFailed { .. } => "creation",
            TableError::ExtensionFailed { .. } => "extension",
            TableError::EmptyBatch
            | TableError::BatchTooLarge { .. }
            | TableError::CapacityExceeded { .. }
            | TableError::AuthorityMismatch { .. } => "input",
            TableError::NotReady(_) => "not_ready",
            TableError::Decode(_) => "decode",
            TableError::Ledger(_) => "ledger",
            TableError::Persistence(_) => "persistence",
        }
    }
}

impl Transient for TableError {
    fn is_transient(&self) -> bool {
        self.is_retryable()
    }
}

/// A created table and the number of addresses this run has appended to it
#[derive(Debug, PartialEq, Eq)]
pub struct TableHandle {
    address: Pubkey,
    authority: Pubkey,
    len: usize,
}

impl TableHandle {
    pub fn new(address: Pubkey, authority: Pubkey) -> Self {
        Self {
            address,
            authority,
            len: 0,
        }
    }

    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    pub fn authority(&self) -> &Pubkey {
        &self.authority
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        MAX_TABLE_ADDRESSES.saturating_sub(self.len)
    }
}

/// How a confirmed extension batch reached the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// This call's transaction confirmed
    Submitted(Signature),
    /// An earlier attempt landed after its confirmation window closed; its
    /// signature is not known to be the one that applied
    AlreadyLanded,
}

impl ExtendOutcome {
    pub fn signature(&self) -> Option<Signature> {
        match self {
            ExtendOutcome::Submitted(signature) => Some(*signature),
            ExtendOutcome::AlreadyLanded => None,
        }
    }
}

/// Batch ceiling, settle delays and per-transaction options
#[derive(Debug, Clone, Copy)]
pub struct TableSettings {
    pub max_addresses_per_extend: usize,
    pub settle_delay: Duration,
    pub creation_settle: Duration,
    pub send: SendOptions,
}

impl TableSettings {
    pub fn from_config(table: &TableConfig, retry: &RetryConfig, max_tx_size: usize) -> Self {
        Self {
            max_addresses_per_extend: table.max_addresses_per_extend,
            settle_delay: Duration::from_millis(table.settle_delay_ms),
            creation_settle: Duration::from_millis(table.creation_settle_ms),
            send: SendOptions {
                compute_units: table.compute_units,
                compute_unit_price: table.compute_unit_price,
                confirm_timeout: Duration::from_secs(retry.confirm_timeout_secs),
                max_tx_size,
            },
        }
    }
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            max_addresses_per_extend: 20,
            settle_delay: Duration::from_secs(10),
            creation_settle: Duration::from_secs(15),
            send: SendOptions {
                compute_units: 50_000,
                compute_unit_price: 500_000,
                confirm_timeout: Duration::from_secs(60),
                max_tx_size: MAX_TRANSACTION_SIZE,
            },
        }
    }
}

/// Every address the launch transactions should resolve through the table:
/// identities, their token accounts, their wrapped-SOL accounts, then the
/// encoder's shared addresses. Later duplicates are dropped.
pub fn collect_addresses(
    identities: &[Pubkey],
    encoder: &dyn InstructionEncoder,
    creator: &Pubkey,
    mint: &Pubkey,
) -> Vec<Pubkey> {
    let ordered = identities
        .iter()
        .copied()
        .chain(identities.iter().map(|id| encoder.token_account(id, mint)))
        .chain(identities.iter().map(|id| encoder.wrapped_native_account(id)))
        .chain(encoder.shared_addresses(creator, mint));

    let mut seen = HashSet::new();
    ordered.filter(|address| seen.insert(*address)).collect()
}

pub struct ReferenceTableBuilder {
    ledger: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
    settings: TableSettings,
    store: Option<KeyStore>,
    metrics: Option<Arc<Metrics>>,
}

impl ReferenceTableBuilder {
    pub fn new(ledger: Arc<dyn LedgerClient>, policy: RetryPolicy, settings: TableSettings) -> Self {
        Self {
            ledger,
            policy,
            settings,
            store: None,
            metrics: None,
        }
    }

    /// Record created table addresses in `store`
    pub fn with_store(mut self, store: KeyStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &TableSettings {
        &self.settings
    }

    /// Create a table owned by `authority`.
    ///
    /// Each attempt derives the table address from a fresh slot. Before a
    /// retry, tables from earlier attempts are checked so a late landing
    /// create is adopted instead of duplicated.
    pub async fn create_table(&self, authority: &Keypair) -> Result<TableHandle, TableError> {
        let authority_address = authority.pubkey();
        let attempted: Mutex<Vec<Pubkey>> = Mutex::new(Vec::new());

        let result = retry_fixed("create_table", &self.policy, |attempt| {
            let attempted = &attempted;
            async move {
                if attempt > 1 {
                    let earlier = attempted.lock().await.clone();
                    if let Some(address) = self.find_existing(&earlier).await {
                        info!(table = %address, "Earlier table creation landed");
                        return Ok(address);
                    }
                }

                let slot = match self.ledger.get_slot().await {
                    Ok(slot) => slot,
                    Err(source) => return Err(SendError::Ledger { signature: None, source }),
                };
                let (instruction, address) = create_lookup_table(authority_address, authority_address, slot);
                attempted.lock().await.push(address);
                debug!(table = %address, slot, attempt, "Creating lookup table");

                send_and_confirm(self.ledger.as_ref(), authority, &[], &[instruction], &self.settings.send)
                    .await
                    .map(|_| address)
            }
        })
        .await;

        let address = result.map_err(|e| TableError::CreationFailed {
            attempts: e.attempts(),
            last_error: e.last_error().to_string(),
        })?;

        if let Some(store) = &self.store {
            store
                .append_async(TABLE_LABEL, vec![Zeroizing::new(address.to_string())])
                .await?;
        }
        info!(
            table = %address,
            settle_ms = self.settings.creation_settle.as_millis() as u64,
            "🗂️ Lookup table created, waiting for it to settle"
        );
        sleep(self.settings.creation_settle).await;

        Ok(TableHandle::new(address, authority_address))
    }

    /// Append one batch to the table, in order.
    ///
    /// The batch is retried as a whole; ledger semantics make each extend all
    /// or nothing. No settle delay is applied here.
    pub async fn extend(
        &self,
        table: &mut TableHandle,
        authority: &Keypair,
        addresses: &[Pubkey],
    ) -> Result<ExtendOutcome, TableError> {
        if addresses.is_empty() {
            return Err(TableError::EmptyBatch);
        }
        if addresses.len() > self.settings.max_addresses_per_extend {
            return Err(TableError::BatchTooLarge {
                len: addresses.len(),
                max: self.settings.max_addresses_per_extend,
            });
        }
        self.check_capacity(table, addresses.len())?;
        if authority.pubkey() != table.authority {
            return Err(TableError::AuthorityMismatch {
                table: table.address,
                expected: table.authority,
                actual: authority.pubkey(),
            });
        }

        let offset = table.len;
        let instruction = extend_lookup_table(
            table.address,
            table.authority,
            Some(table.authority),
            addresses.to_vec(),
        );
        let table_ref: &TableHandle = table;

        let result = retry_fixed("extend_table", &self.policy, |attempt| {
            let instruction = &instruction;
            async move {
                if attempt > 1 && self.batch_landed(table_ref, offset, addresses).await {
                    info!(table = %table_ref.address, offset, "Earlier extension attempt landed");
                    return Ok(ExtendOutcome::AlreadyLanded);
                }
                send_and_confirm(
                    self.ledger.as_ref(),
                    authority,
                    &[],
                    std::slice::from_ref(instruction),
                    &self.settings.send,
                )
                .await
                .map(ExtendOutcome::Submitted)
            }
        })
        .await;

        let outcome = result.map_err(|e| {
            let attempts = e.attempts();
            let last = e.into_inner();
            TableError::ExtensionFailed {
                offset,
                attempts,
                last_signature: last.signature(),
                last_error: last.to_string(),
            }
        })?;

        table.len += addresses.len();
        if let Some(metrics) = &self.metrics {
            metrics.table_extend_batches.inc();
            metrics.table_addresses.inc_by(addresses.len() as u64);
            metrics.table_len.set(table.len as i64);
        }
        debug!(table = %table.address, added = addresses.len(), len = table.len, "Extended lookup table");
        Ok(outcome)
    }

    /// Append `addresses` in ceiling-sized batches, strictly one after
    /// another, settling after every batch. Returns the number of batches.
    pub async fn extend_all(
        &self,
        table: &mut TableHandle,
        authority: &Keypair,
        addresses: &[Pubkey],
    ) -> Result<usize, TableError> {
        self.check_capacity(table, addresses.len())?;
        let batches: Vec<&[Pubkey]> = addresses.chunks(self.settings.max_addresses_per_extend.max(1)).collect();
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let outcome = self.extend(table, authority, batch).await?;
            info!(
                table = %table.address,
                signature = ?outcome.signature(),
                batch = index + 1,
                batches = total,
                addresses = batch.len(),
                settle_ms = self.settings.settle_delay.as_millis() as u64,
                "Extension batch confirmed, settling"
            );
            sleep(self.settings.settle_delay).await;
        }
        Ok(total)
    }

    /// Read and decode the table as the ledger currently sees it.
    ///
    /// Fails with `NotReady` while the account is absent or holds fewer
    /// entries than this handle has appended.
    pub async fn fetch(&self, table: &TableHandle) -> Result<AddressLookupTableAccount, TableError> {
        let data = self
            .ledger
            .read_account(&table.address)
            .await?
            .ok_or(TableError::NotReady(table.address))?;
        let decoded = AddressLookupTable::deserialize(&data).map_err(|e| TableError::Decode(e.to_string()))?;

        if decoded.addresses.len() < table.len {
            warn!(
                table = %table.address,
                visible = decoded.addresses.len(),
                expected = table.len,
                "Lookup table lags behind confirmed extensions"
            );
            return Err(TableError::NotReady(table.address));
        }

        Ok(AddressLookupTableAccount {
            key: table.address,
            addresses: decoded.addresses.to_vec(),
        })
    }

    fn check_capacity(&self, table: &TableHandle, requested: usize) -> Result<(), TableError> {
        if requested > table.remaining() {
            return Err(TableError::CapacityExceeded {
                current: table.len,
                requested,
                capacity: MAX_TABLE_ADDRESSES,
            });
        }
        Ok(())
    }

    async fn find_existing(&self, candidates: &[Pubkey]) -> Option<Pubkey> {
        for address in candidates {
            match self.ledger.read_account(address).await {
                Ok(Some(_)) => return Some(*address),
                Ok(None) => {}
                Err(e) => debug!(table = %address, error = %e, "Could not check earlier table"),
            }
        }
        None
    }

    async fn batch_landed(&self, table: &TableHandle, offset: usize, batch: &[Pubkey]) -> bool {
        let Ok(Some(data)) = self.ledger.read_account(&table.address).await else {
            return false;
        };
        let Ok(decoded) = AddressLookupTable::deserialize(&data) else {
            return false;
        };
        decoded
            .addresses
            .get(offset..offset + batch.len())
            .is_some_and(|rows| rows == batch)
    }
}
