//! Launch Bundler
//!
//! Command line entry point: loads configuration and the funding identity,
//! publishes token metadata, then runs one launch and reports its outcome.
//!
//! ## Stages
//!
//! - **Mint**: fresh or vanity mint key, persisted first
//! - **Funding**: balance precondition, identity generation, one-shot distribution
//! - **Lookup table**: creation and sequential extension with settle delays
//! - **Bundle**: launch and buy groups packed, posted to every block engine, confirmed

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use solana_sdk::signature::{Keypair, Signer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use launch_bundler::config::{sol_to_lamports, Config};
use launch_bundler::distributor::check_funding;
use launch_bundler::identity::{generate_vanity, load_funder};
use launch_bundler::ledger::{LedgerClient, RpcLedger};
use launch_bundler::metadata::{publish, HttpMetadataPublisher};
use launch_bundler::metrics::Metrics;
use launch_bundler::orchestrator::{BundleOutcome, LaunchPlan, Orchestrator, RunContext};
use launch_bundler::relay::JitoRelay;
use launch_bundler::tx_builder::LaunchpadEncoder;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "LAUNCH_CONFIG", default_value = "launch.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Validate configuration and funding, then exit without touching the ledger
    #[arg(long)]
    check_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(Some(&args.config))
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    init_logging(args.verbose, args.json_logs || config.monitoring.log_json)?;

    info!("🚀 Starting Launch Bundler");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    config.validate().context("Invalid configuration")?;

    let funder = Arc::new(load_funder(&config.wallet).context("Failed to load funding identity")?);
    info!("💼 Funding identity: {}", funder.pubkey());

    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedger::new(&config.rpc));
    info!("🌐 RPC endpoint: {}", config.rpc.url);

    if args.check_only {
        return check_only(&config, ledger.as_ref(), &funder).await;
    }

    let encoder = Arc::new(LaunchpadEncoder::from_config(&config.protocol, &config.packing).context("Invalid protocol configuration")?);
    let relay = Arc::new(
        JitoRelay::new(Duration::from_secs(config.relay.http_timeout_secs)).context("Failed to build relay client")?,
    );
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let mint = Arc::new(mint_keypair(&config).await?);
    info!("🪙 Mint: {}", mint.pubkey());

    let publisher = HttpMetadataPublisher::from_config(
        &config.metadata,
        Duration::from_secs(config.relay.http_timeout_secs),
    )
    .context("Failed to build metadata client")?;
    let uri = publish(&publisher, &config.metadata)
        .await
        .context("Failed to publish token metadata")?;

    let plan = LaunchPlan::from_config(&config, funder, mint, uri);
    let dump_metrics = config.monitoring.dump_metrics;
    let ctx = RunContext::new(config, ledger, relay, encoder, metrics.clone());
    info!(run_id = %ctx.run_id, identities = plan.identity_count, "🎬 Launch run starting");

    let report = Orchestrator::new(ctx).run(&plan).await?;

    if dump_metrics {
        match metrics.render() {
            Ok(text) => debug!("Run metrics:\n{text}"),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }
    }

    info!(
        run_id = %report.run_id,
        mint = %report.mint,
        table = %report.table_address,
        identities = %report.identities_path.display(),
        groups = report.groups,
        "📋 Run artifacts"
    );

    match report.outcome {
        BundleOutcome::Confirmed(signature) => {
            info!("✅ Launch confirmed: {signature}");
            Ok(())
        }
        BundleOutcome::Failed(e) if e.is_ambiguous() => {
            bail!("Launch outcome unknown, re-check before resubmitting: {e}")
        }
        BundleOutcome::Failed(e) => bail!("Launch bundle failed: {e}"),
    }
}

/// Report the funding precondition without mutating anything
async fn check_only(config: &Config, ledger: &dyn LedgerClient, funder: &Keypair) -> Result<()> {
    let balance = ledger
        .get_balance(&funder.pubkey())
        .await
        .context("Failed to read funder balance")?;
    let required = check_funding(
        balance,
        config.launch.identity_count,
        config.per_identity_lamports(),
        sol_to_lamports(config.launch.fee_reserve_sol),
    )?;
    info!(balance, required, "✅ Configuration valid and funding sufficient");
    Ok(())
}

/// Fresh mint key, or a vanity key when a suffix is configured
async fn mint_keypair(config: &Config) -> Result<Keypair> {
    let Some(suffix) = config.launch.vanity_suffix.clone() else {
        return Ok(Keypair::new());
    };
    info!("🔎 Searching for mint ending in '{suffix}'");
    match generate_vanity(suffix, config.launch.vanity_max_attempts).await? {
        Some(keypair) => Ok(keypair),
        None => bail!("No vanity mint found within {} attempts", config.launch.vanity_max_attempts),
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "launch_bundler=debug,info"
    } else {
        "launch_bundler=info,warn"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter.into()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
