//! In-memory ledger and relay for integration tests
//!
//! `MockLedger` applies system transfers and lookup table create/extend
//! instructions from submitted transactions, so tests can assert on the
//! resulting balances and table contents. Submission outcomes are scripted
//! per call with [`SubmitBehavior`].

#![allow(dead_code)]

use async_trait::async_trait;
use launch_bundler::ledger::{Checkpoint, LedgerClient, LedgerError, SignatureState};
use launch_bundler::relay::{RelayAck, RelayChannel, RelayError};
use launch_bundler::identity::Keyring;
use launch_bundler::tx_builder::{OperationDescriptor, PackerConfig, TransactionGroup, TransactionPacker};
use solana_sdk::{
    address_lookup_table::program as alt_program,
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction, system_program,
    transaction::VersionedTransaction,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Length of the lookup table metadata header preceding the addresses
pub const TABLE_META_SIZE: usize = 56;

/// What the ledger does with the next submitted transaction
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// Apply and report confirmed
    Confirm,
    /// Do not apply; report failed with the reason
    Reject(String),
    /// Refuse the submission itself
    Error(LedgerError),
    /// Do not apply; stay pending forever
    Drop,
    /// Apply, but report pending until this much time has passed
    LandAfter(Duration),
}

#[derive(Debug, Clone)]
pub struct TableState {
    pub authority: Pubkey,
    pub addresses: Vec<Pubkey>,
}

#[derive(Debug)]
struct Landing {
    state: SignatureState,
    visible_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    balances: HashMap<Pubkey, u64>,
    tables: HashMap<Pubkey, TableState>,
    statuses: HashMap<Signature, Landing>,
    script: VecDeque<SubmitBehavior>,
    submitted: Vec<(Instant, VersionedTransaction)>,
    slot: u64,
    block_height: u64,
    hidden_table_reads: usize,
}

pub struct MockLedger {
    state: Mutex<State>,
    pub status_polls: AtomicUsize,
    pub balance_reads: AtomicUsize,
    pub checkpoint_reads: AtomicUsize,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slot: 1_000,
                block_height: 500,
                ..State::default()
            }),
            status_polls: AtomicUsize::new(0),
            balance_reads: AtomicUsize::new(0),
            checkpoint_reads: AtomicUsize::new(0),
        }
    }

    pub fn fund(&self, address: &Pubkey, lamports: u64) {
        self.state.lock().unwrap().balances.insert(*address, lamports);
    }

    pub fn balance(&self, address: &Pubkey) -> u64 {
        self.state.lock().unwrap().balances.get(address).copied().unwrap_or(0)
    }

    /// Queue outcomes for the next submissions; afterwards every submission confirms
    pub fn script(&self, behaviors: impl IntoIterator<Item = SubmitBehavior>) {
        self.state.lock().unwrap().script.extend(behaviors);
    }

    pub fn set_status(&self, signature: Signature, state: SignatureState) {
        self.state.lock().unwrap().statuses.insert(
            signature,
            Landing {
                state,
                visible_at: None,
            },
        );
    }

    /// Report the table as absent for the next `reads` account reads
    pub fn hide_table_reads(&self, reads: usize) {
        self.state.lock().unwrap().hidden_table_reads = reads;
    }

    pub fn advance_block_height(&self, blocks: u64) {
        self.state.lock().unwrap().block_height += blocks;
    }

    pub fn table(&self, address: &Pubkey) -> Option<TableState> {
        self.state.lock().unwrap().tables.get(address).cloned()
    }

    pub fn submissions(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    /// Submission instants, in order
    pub fn submission_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().submitted.iter().map(|(t, _)| *t).collect()
    }

    pub fn submitted(&self) -> Vec<VersionedTransaction> {
        self.state.lock().unwrap().submitted.iter().map(|(_, tx)| tx.clone()).collect()
    }
}

fn apply(state: &mut State, tx: &VersionedTransaction) -> Result<(), String> {
    let keys = tx.message.static_account_keys();
    let mut balances = state.balances.clone();
    let mut tables = state.tables.clone();

    for ix in tx.message.instructions() {
        let program = keys[ix.program_id_index as usize];
        let account = |i: usize| keys[ix.accounts[i] as usize];
        let tag = ix
            .data
            .get(..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_le_bytes)
            .unwrap_or(u32::MAX);

        if program == system_program::id() && tag == 2 {
            let lamports = u64::from_le_bytes(ix.data[4..12].try_into().unwrap());
            let from = balances.entry(account(0)).or_insert(0);
            *from = from.checked_sub(lamports).ok_or("insufficient lamports")?;
            *balances.entry(account(1)).or_insert(0) += lamports;
        } else if program == alt_program::id() && tag == 0 {
            tables.insert(
                account(0),
                TableState {
                    authority: account(1),
                    addresses: Vec::new(),
                },
            );
        } else if program == alt_program::id() && tag == 2 {
            let table = tables.get_mut(&account(0)).ok_or("table does not exist")?;
            if table.authority != account(1) {
                return Err("wrong table authority".to_string());
            }
            let count = u64::from_le_bytes(ix.data[4..12].try_into().unwrap()) as usize;
            for i in 0..count {
                let start = 12 + i * 32;
                let bytes: [u8; 32] = ix.data[start..start + 32].try_into().unwrap();
                table.addresses.push(Pubkey::new_from_array(bytes));
            }
            if table.addresses.len() > 256 {
                return Err("table full".to_string());
            }
        }
    }

    state.balances = balances;
    state.tables = tables;
    Ok(())
}

/// Serialized lookup table account as the program lays it out
pub fn encode_table(table: &TableState) -> Vec<u8> {
    let mut data = Vec::with_capacity(TABLE_META_SIZE + table.addresses.len() * 32);
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&u64::MAX.to_le_bytes());
    data.extend_from_slice(&0u64.to_le_bytes());
    data.push(0);
    data.push(1);
    data.extend_from_slice(table.authority.as_ref());
    data.extend_from_slice(&[0u8; 2]);
    for address in &table.addresses {
        data.extend_from_slice(address.as_ref());
    }
    data
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError> {
        self.balance_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.balance(address))
    }

    async fn get_latest_checkpoint(&self) -> Result<Checkpoint, LedgerError> {
        self.checkpoint_reads.fetch_add(1, Ordering::SeqCst);
        let height = self.state.lock().unwrap().block_height;
        Ok(Checkpoint {
            blockhash: Hash::new_unique(),
            last_valid_block_height: height + 150,
        })
    }

    async fn get_slot(&self) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().unwrap();
        state.slot += 1;
        Ok(state.slot)
    }

    async fn block_height(&self) -> Result<u64, LedgerError> {
        Ok(self.state.lock().unwrap().block_height)
    }

    async fn submit(&self, tx: &VersionedTransaction) -> Result<Signature, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let behavior = state.script.pop_front().unwrap_or(SubmitBehavior::Confirm);
        if let SubmitBehavior::Error(e) = &behavior {
            return Err(e.clone());
        }

        let now = Instant::now();
        let signature = tx.signatures[0];
        state.submitted.push((now, tx.clone()));

        let landing = match behavior {
            SubmitBehavior::Confirm => match apply(&mut state, tx) {
                Ok(()) => Landing {
                    state: SignatureState::Confirmed,
                    visible_at: None,
                },
                Err(reason) => Landing {
                    state: SignatureState::Failed(reason),
                    visible_at: None,
                },
            },
            SubmitBehavior::Reject(reason) => Landing {
                state: SignatureState::Failed(reason),
                visible_at: None,
            },
            SubmitBehavior::Drop => Landing {
                state: SignatureState::Pending,
                visible_at: None,
            },
            SubmitBehavior::LandAfter(delay) => {
                let state_after = match apply(&mut state, tx) {
                    Ok(()) => SignatureState::Confirmed,
                    Err(reason) => SignatureState::Failed(reason),
                };
                Landing {
                    state: state_after,
                    visible_at: Some(now + delay),
                }
            }
            SubmitBehavior::Error(_) => unreachable!(),
        };
        state.statuses.insert(signature, landing);
        Ok(signature)
    }

    async fn signature_state(&self, signature: &Signature) -> Result<SignatureState, LedgerError> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(match state.statuses.get(signature) {
            Some(Landing {
                visible_at: Some(at), ..
            }) if Instant::now() < *at => SignatureState::Pending,
            Some(landing) => landing.state.clone(),
            None => SignatureState::Pending,
        })
    }

    async fn read_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let Some(table) = state.tables.get(address).cloned() else {
            return Ok(None);
        };
        if state.hidden_table_reads > 0 {
            state.hidden_table_reads -= 1;
            return Ok(None);
        }
        Ok(Some(encode_table(&table)))
    }
}

/// Scripted reply of one relay endpoint
#[derive(Debug, Clone)]
pub enum RelayBehavior {
    Accept,
    Fail(RelayError),
    AcceptAfter(Duration),
    /// Never respond
    Hang,
}

/// Counts a post as in flight until its future completes or is dropped
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockRelay {
    behaviors: HashMap<String, RelayBehavior>,
    posts: Mutex<Vec<(String, usize)>>,
    landing: Option<(Arc<MockLedger>, SignatureState)>,
    in_flight: Arc<AtomicUsize>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, endpoint: &str, behavior: RelayBehavior) -> Self {
        self.behaviors.insert(endpoint.to_string(), behavior);
        self
    }

    /// On accept, report the bundle's first transaction to `ledger` as `state`
    pub fn landing(mut self, ledger: Arc<MockLedger>, state: SignatureState) -> Self {
        self.landing = Some((ledger, state));
        self
    }

    /// `(endpoint, transaction count)` per post
    pub fn posts(&self) -> Vec<(String, usize)> {
        self.posts.lock().unwrap().clone()
    }

    /// Posts that have neither answered nor been cancelled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayChannel for MockRelay {
    async fn post(&self, endpoint: &str, transactions: &[String]) -> Result<RelayAck, RelayError> {
        self.posts.lock().unwrap().push((endpoint.to_string(), transactions.len()));
        let _in_flight = InFlight::enter(&self.in_flight);
        let behavior = self
            .behaviors
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| RelayBehavior::Fail(RelayError::Transport("connection refused".to_string())));
        match behavior {
            RelayBehavior::Accept => {}
            RelayBehavior::Fail(e) => return Err(e),
            RelayBehavior::AcceptAfter(delay) => tokio::time::sleep(delay).await,
            RelayBehavior::Hang => std::future::pending::<()>().await,
        }
        if let Some((ledger, state)) = &self.landing {
            let bytes = bs58::decode(&transactions[0]).into_vec().unwrap();
            let tx: VersionedTransaction = bincode::deserialize(&bytes).unwrap();
            ledger.set_status(tx.signatures[0], state.clone());
        }
        Ok(RelayAck {
            endpoint: endpoint.to_string(),
            bundle_id: Some(format!("bundle-{}", transactions.len())),
        })
    }
}

/// `count` signed single-transfer groups, each paid by its own identity
pub fn transfer_groups(count: usize) -> Vec<TransactionGroup> {
    let payers: Vec<Arc<Keypair>> = (0..count).map(|_| Arc::new(Keypair::new())).collect();
    let mut keyring = Keyring::new();
    for payer in &payers {
        keyring.insert(payer.clone());
    }
    let operations: Vec<OperationDescriptor> = payers
        .iter()
        .map(|p| {
            OperationDescriptor::new(
                p.pubkey(),
                vec![system_instruction::transfer(&p.pubkey(), &Pubkey::new_unique(), 1_000)],
                300,
            )
        })
        .collect();

    let packer = TransactionPacker::new(PackerConfig {
        group_size: 1,
        ..PackerConfig::default()
    })
    .unwrap();
    packer
        .pack(&operations, |op| *op.owner(), &[], Hash::new_unique(), &keyring)
        .unwrap()
}
