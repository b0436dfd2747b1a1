//! Launch run sequencing
//!
//! One [`Orchestrator::run`] is one launch: persist the mint, check funding,
//! generate and fund identities, build the lookup table, pack the launch and
//! buy operations, and submit them as a single bundle. Every stage either
//! completes or aborts the run with a [`LaunchError`] naming the stage and
//! the last ledger state it observed. Nothing is rolled back.

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{sol_to_lamports, Config};
use crate::distributor::{CapitalDistributor, DistributionError};
use crate::identity::{secret_base58, IdentityPool, Keyring};
use crate::keystore::{KeyStore, PersistenceError, MINT_LABEL};
use crate::ledger::{Checkpoint, LedgerClient, LedgerError, SendOptions};
use crate::lookup_table::{collect_addresses, ReferenceTableBuilder, TableError, TableSettings};
use crate::metrics::Metrics;
use crate::observability::{RunId, StageContext};
use crate::relay::{tip_instruction, RelayChannel};
use crate::retry::retry_fixed;
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::{
    Bundle, BundleError, BundleSubmitter, InstructionEncoder, LaunchMetadata, OperationDescriptor, PackError,
    PackerConfig, TransactionGroup, TransactionPacker, MAX_BUNDLE_TRANSACTIONS,
};

/// Compute units declared for the relay tip transfer
const TIP_COMPUTE_UNITS: u32 = 1_000;

/// Error raised inside a stage
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl StageFailure {
    pub fn category(&self) -> &'static str {
        match self {
            StageFailure::Persistence(_) => "persistence",
            StageFailure::Distribution(e) => e.category(),
            StageFailure::Table(e) => e.category(),
            StageFailure::Pack(e) => e.category(),
            StageFailure::Bundle(e) => e.category(),
            StageFailure::Ledger(e) => e.category(),
        }
    }
}

/// Fatal run failure
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source} (last state: {last_state})")]
pub struct LaunchError {
    stage: &'static str,
    last_state: String,
    source: StageFailure,
}

impl LaunchError {
    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Last ledger state observed before the failure, for manual recovery
    pub fn last_state(&self) -> &str {
        &self.last_state
    }

    pub fn failure(&self) -> &StageFailure {
        &self.source
    }

    pub fn category(&self) -> &'static str {
        self.source.category()
    }
}

/// Everything a run needs, passed explicitly
pub struct RunContext {
    pub run_id: RunId,
    pub config: Config,
    pub ledger: Arc<dyn LedgerClient>,
    pub relay: Arc<dyn RelayChannel>,
    pub encoder: Arc<dyn InstructionEncoder>,
    pub store: KeyStore,
    pub metrics: Arc<Metrics>,
    pub logger: StructuredLogger,
}

impl RunContext {
    pub fn new(
        config: Config,
        ledger: Arc<dyn LedgerClient>,
        relay: Arc<dyn RelayChannel>,
        encoder: Arc<dyn InstructionEncoder>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let run_id = RunId::new();
        let store = KeyStore::new(&config.storage.keys_dir);
        Self {
            logger: StructuredLogger::new(run_id.clone()),
            run_id,
            config,
            ledger,
            relay,
            encoder,
            store,
            metrics,
        }
    }

    /// Replace the key store derived from configuration
    pub fn with_store(mut self, store: KeyStore) -> Self {
        self.store = store;
        self
    }
}

/// Inputs of one launch
pub struct LaunchPlan {
    pub funder: Arc<Keypair>,
    pub mint: Arc<Keypair>,
    pub identity_count: usize,
    /// Transferred to every identity: swap amount plus fee buffer
    pub per_identity_lamports: u64,
    /// Spent by every identity's buy
    pub buy_lamports: u64,
    pub fee_reserve_lamports: u64,
    pub tip_lamports: u64,
    pub metadata: LaunchMetadata,
    pub relays: Vec<String>,
}

impl LaunchPlan {
    pub fn from_config(config: &Config, funder: Arc<Keypair>, mint: Arc<Keypair>, uri: String) -> Self {
        Self {
            funder,
            mint,
            identity_count: config.launch.identity_count,
            per_identity_lamports: config.per_identity_lamports(),
            buy_lamports: sol_to_lamports(config.launch.swap_amount_sol),
            fee_reserve_lamports: sol_to_lamports(config.launch.fee_reserve_sol),
            tip_lamports: sol_to_lamports(config.relay.tip_sol),
            metadata: LaunchMetadata {
                name: config.metadata.name.clone(),
                symbol: config.metadata.symbol.clone(),
                uri,
            },
            relays: config.relay.endpoints.clone(),
        }
    }
}

/// Final state of the bundle; a timeout stays distinct from a rejection
#[derive(Debug, Clone)]
pub enum BundleOutcome {
    Confirmed(Signature),
    Failed(BundleError),
}

impl BundleOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, BundleOutcome::Confirmed(_))
    }

    pub fn signature(&self) -> Option<Signature> {
        match self {
            BundleOutcome::Confirmed(signature) => Some(*signature),
            BundleOutcome::Failed(e) => e.signature().copied(),
        }
    }
}

/// What a run produced and where its artifacts live
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub mint: Pubkey,
    pub identities_path: PathBuf,
    pub distribution_signature: Signature,
    pub table_address: Pubkey,
    pub groups: usize,
    pub outcome: BundleOutcome,
}

pub struct Orchestrator {
    ctx: RunContext,
}

impl Orchestrator {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Identity key file label for this run
    pub fn identity_label(&self) -> String {
        format!("{}-{}", self.ctx.config.storage.identity_label, self.ctx.run_id.short())
    }

    /// Number of transactions the bundle will hold.
    ///
    /// Partitions placeholder identities' operations against a table laid out
    /// like the real one, so size and compute splits are counted exactly as
    /// the pack stage will make them.
    pub fn planned_transactions(&self, plan: &LaunchPlan) -> Result<usize, PackError> {
        let funder = plan.funder.pubkey();
        let mint = plan.mint.pubkey();
        let identities: Vec<Pubkey> = (0..plan.identity_count).map(|_| Pubkey::new_unique()).collect();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: collect_addresses(&identities, self.ctx.encoder.as_ref(), &funder, &mint),
        };
        let tables = std::slice::from_ref(&table);

        let (launch_packer, launch_ops) = self.launch_batch(plan)?;
        let launch = launch_packer.plan(&launch_ops, |_| funder, tables)?;
        let buys = self.buy_operations(plan, &identities)?;
        let buy_groups = TransactionPacker::new(PackerConfig::from(&self.ctx.config.packing))?
            .plan(&buys, |op| *op.owner(), tables)?;

        Ok(launch.len() + buy_groups.len())
    }

    pub async fn run(&self, plan: &LaunchPlan) -> Result<RunReport, LaunchError> {
        let ctx = &self.ctx;
        let cfg = &ctx.config;
        let funder = plan.funder.pubkey();
        let mint = plan.mint.pubkey();

        // Precondition: the bundle cannot exceed the relay limit
        let stage = ctx.logger.stage_started("plan");
        let expected = self
            .planned_transactions(plan)
            .map_err(|e| self.fail(&stage, e, format!("identities={}", plan.identity_count)))?;
        if expected > MAX_BUNDLE_TRANSACTIONS {
            return Err(self.fail(
                &stage,
                BundleError::TooManyTransactions {
                    count: expected,
                    max: MAX_BUNDLE_TRANSACTIONS,
                },
                format!("identities={} group_size={}", plan.identity_count, cfg.packing.group_size),
            ));
        }
        self.complete(&stage, &format!("{expected} transactions"));

        let stage = ctx.logger.stage_started("mint");
        ctx.store
            .append_async(MINT_LABEL, vec![secret_base58(&plan.mint)])
            .await
            .map_err(|e| self.fail(&stage, e, format!("mint={mint} unsaved")))?;
        self.complete(&stage, &mint.to_string());

        let distributor = CapitalDistributor::new(
            ctx.ledger.clone(),
            cfg.retry_policy(),
            SendOptions {
                compute_units: cfg.distribution.compute_units,
                compute_unit_price: cfg.distribution.compute_unit_price,
                confirm_timeout: Duration::from_secs(cfg.retry.confirm_timeout_secs),
                max_tx_size: cfg.packing.max_tx_size,
            },
            plan.fee_reserve_lamports,
        )
        .with_metrics(ctx.metrics.clone());

        let stage = ctx.logger.stage_started("funding_check");
        let balance = distributor
            .check_balance(&funder, plan.identity_count, plan.per_identity_lamports)
            .await
            .map_err(|e| self.fail(&stage, e, format!("funder={funder}")))?;
        self.complete(&stage, &format!("balance={balance}"));

        let stage = ctx.logger.stage_started("identities");
        let label = self.identity_label();
        let pool = IdentityPool::generate(plan.identity_count, &ctx.store, &label)
            .await
            .map_err(|e| self.fail(&stage, e, format!("balance={balance} no identities saved")))?;
        ctx.metrics.identities_generated.inc_by(pool.len() as u64);
        ctx.logger.log_identities_persisted(&label, pool.len());
        self.complete(&stage, &pool.path().display().to_string());
        let identities = pool.pubkeys();

        let stage = ctx.logger.stage_started("distribution");
        let distribution_signature = distributor
            .distribute(&plan.funder, &identities, plan.per_identity_lamports)
            .await
            .map_err(|e| {
                let last = e
                    .last_signature()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "none".to_string());
                self.fail(
                    &stage,
                    e,
                    format!("balance={balance} identities={} last_signature={last}", pool.path().display()),
                )
            })?;
        self.complete(&stage, &distribution_signature.to_string());

        let builder = ReferenceTableBuilder::new(
            ctx.ledger.clone(),
            cfg.retry_policy(),
            TableSettings::from_config(&cfg.table, &cfg.retry, cfg.packing.max_tx_size),
        )
        .with_store(ctx.store.clone())
        .with_metrics(ctx.metrics.clone());

        let stage = ctx.logger.stage_started("table_create");
        let mut table = builder
            .create_table(&plan.funder)
            .await
            .map_err(|e| self.fail(&stage, e, format!("distribution={distribution_signature}")))?;
        self.complete(&stage, &table.address().to_string());

        let stage = ctx.logger.stage_started("table_extend");
        let addresses = collect_addresses(&identities, ctx.encoder.as_ref(), &funder, &mint);
        let batches = builder
            .extend_all(&mut table, &plan.funder, &addresses)
            .await
            .map_err(|e| self.fail(&stage, e, format!("table={} len={}", table.address(), table.len())))?;
        self.complete(&stage, &format!("{} addresses in {batches} batches", addresses.len()));

        let stage = ctx.logger.stage_started("table_fetch");
        let table_account = retry_fixed("fetch_table", &cfg.retry_policy(), |_| builder.fetch(&table))
            .await
            .map_err(|e| {
                self.fail(
                    &stage,
                    e.into_inner(),
                    format!("table={} len={}", table.address(), table.len()),
                )
            })?;
        self.complete(&stage, &format!("{} entries", table_account.addresses.len()));

        let stage = ctx.logger.stage_started("pack");
        let checkpoint = ctx
            .ledger
            .get_latest_checkpoint()
            .await
            .map_err(|e| self.fail(&stage, e, format!("table={}", table.address())))?;
        let mut keyring = Keyring::new();
        keyring.insert(plan.funder.clone());
        keyring.insert(plan.mint.clone());
        pool.register(&mut keyring);

        let groups = self
            .pack(plan, &identities, &[table_account], &checkpoint, &keyring)
            .map_err(|e| self.fail(&stage, e, format!("table={}", table.address())))?;
        for (index, group) in groups.iter().enumerate() {
            ctx.logger
                .log_group_packed(index, group.operations, group.size, group.compute_units);
        }
        ctx.metrics.groups_packed.inc_by(groups.len() as u64);
        let group_count = groups.len();
        self.complete(&stage, &format!("{group_count} groups"));

        let stage = ctx.logger.stage_started("submit");
        let bundle = Bundle::new(groups).map_err(|e| self.fail(&stage, e, format!("table={}", table.address())))?;
        let submitter = BundleSubmitter::new(ctx.relay.clone(), ctx.ledger.clone()).with_metrics(ctx.metrics.clone());
        let outcome = match submitter
            .submit(
                &bundle,
                &plan.relays,
                &checkpoint,
                Duration::from_secs(cfg.relay.confirm_timeout_secs),
            )
            .await
        {
            Ok(signature) => {
                ctx.metrics.bundles_confirmed.inc();
                ctx.logger.log_bundle_outcome(&signature.to_string(), "confirmed");
                BundleOutcome::Confirmed(signature)
            }
            Err(e) => {
                ctx.metrics.bundles_failed.inc();
                let signature = bundle.representative_signature().to_string();
                ctx.logger.log_bundle_outcome(&signature, e.category());
                if e.is_ambiguous() {
                    ctx.logger
                        .warn("Bundle outcome is ambiguous; re-poll its signature before resubmitting");
                }
                BundleOutcome::Failed(e)
            }
        };
        self.complete(&stage, if outcome.is_confirmed() { "confirmed" } else { "not confirmed" });

        Ok(RunReport {
            run_id: ctx.run_id.clone(),
            mint,
            identities_path: pool.path().to_path_buf(),
            distribution_signature,
            table_address: *table.address(),
            groups: group_count,
            outcome,
        })
    }

    /// Launch group (creator pays, tip last) followed by the buy groups
    fn pack(
        &self,
        plan: &LaunchPlan,
        identities: &[Pubkey],
        tables: &[AddressLookupTableAccount],
        checkpoint: &Checkpoint,
        keyring: &Keyring,
    ) -> Result<Vec<TransactionGroup>, PackError> {
        let funder = plan.funder.pubkey();

        let (launch_packer, launch_ops) = self.launch_batch(plan)?;
        let mut groups = launch_packer.pack(&launch_ops, |_| funder, tables, checkpoint.blockhash, keyring)?;

        let buys = self.buy_operations(plan, identities)?;
        let buy_packer = TransactionPacker::new(PackerConfig::from(&self.ctx.config.packing))?;
        groups.extend(buy_packer.pack(&buys, |op| *op.owner(), tables, checkpoint.blockhash, keyring)?);

        Ok(groups)
    }

    /// Launch operations plus the relay tip, with a packer that keeps them
    /// in one group
    fn launch_batch(&self, plan: &LaunchPlan) -> Result<(TransactionPacker, Vec<OperationDescriptor>), PackError> {
        let funder = plan.funder.pubkey();
        let mut ops = self
            .ctx
            .encoder
            .launch_operations(&funder, &plan.mint.pubkey(), &plan.metadata)?;
        ops.push(OperationDescriptor::new(
            funder,
            vec![tip_instruction(&funder, plan.tip_lamports)],
            TIP_COMPUTE_UNITS,
        ));

        let packer = TransactionPacker::new(PackerConfig {
            group_size: ops.len(),
            ..PackerConfig::from(&self.ctx.config.packing)
        })?;
        Ok((packer, ops))
    }

    fn buy_operations(&self, plan: &LaunchPlan, identities: &[Pubkey]) -> Result<Vec<OperationDescriptor>, PackError> {
        let mint = plan.mint.pubkey();
        identities
            .iter()
            .map(|buyer| self.ctx.encoder.buy_operation(buyer, &mint, plan.buy_lamports))
            .collect()
    }

    fn complete(&self, stage: &StageContext, detail: &str) {
        self.ctx
            .metrics
            .stage_latency
            .observe(stage.elapsed_ms() as f64 / 1000.0);
        self.ctx.logger.stage_completed(stage, detail);
    }

    fn fail(&self, stage: &StageContext, error: impl Into<StageFailure>, last_state: String) -> LaunchError {
        let source = error.into();
        self.ctx.logger.stage_failed(stage, &source, &last_state);
        LaunchError {
            stage: stage.stage,
            last_state,
            source,
        }
    }
}
