//! Configuration module for the launch bundler
//!
//! Configuration is layered: an optional TOML file, then `LAUNCH__*`
//! environment variables (for example `LAUNCH__RPC__URL`), with `.env`
//! loaded first. Every field has a serde default so a bare environment
//! is enough for a dry `--check-only` run.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey};
use std::{path::Path, str::FromStr, time::Duration};

use crate::retry::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub launch: LaunchConfig,

    #[serde(default)]
    pub packing: PackingConfig,

    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub distribution: DistributionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Commitment used for reads and confirmation ("processed", "confirmed", "finalized")
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Base58 secret key of the funding identity. `PRIVATE_KEY` overrides it.
    #[serde(default)]
    pub private_key: Option<String>,

    /// Path to a JSON byte-array keypair file
    #[serde(default)]
    pub keypair_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Number of ephemeral identities to generate
    #[serde(default = "default_identity_count")]
    pub identity_count: usize,

    /// Amount each identity spends on its buy, in SOL
    #[serde(default = "default_swap_amount")]
    pub swap_amount_sol: f64,

    /// Extra SOL sent to each identity to pay its own fees and rent
    #[serde(default = "default_identity_fee_buffer")]
    pub identity_fee_buffer_sol: f64,

    /// SOL the funder must keep after distribution
    #[serde(default = "default_fee_reserve")]
    pub fee_reserve_sol: f64,

    /// Optional base58 suffix for the mint address
    #[serde(default)]
    pub vanity_suffix: Option<String>,

    /// Attempts before giving up on the vanity suffix
    #[serde(default = "default_vanity_attempts")]
    pub vanity_max_attempts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingConfig {
    /// Serialized transaction ceiling in bytes
    #[serde(default = "default_max_tx_size")]
    pub max_tx_size: usize,

    /// Compute unit ceiling per transaction
    #[serde(default = "default_max_compute_units")]
    pub max_compute_units: u32,

    /// Operations per transaction (hard cap, independent of size)
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Priority fee in micro-lamports per compute unit
    #[serde(default = "default_compute_unit_price")]
    pub compute_unit_price: u64,

    /// Units declared for each buy operation
    #[serde(default = "default_buy_compute_units")]
    pub buy_compute_units: u32,

    /// Units declared for the token creation operation
    #[serde(default = "default_launch_compute_units")]
    pub launch_compute_units: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Addresses per extend call
    #[serde(default = "default_max_addresses_per_extend")]
    pub max_addresses_per_extend: usize,

    /// Wait after each extend batch, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Wait after the table is created, in milliseconds
    #[serde(default = "default_creation_settle_ms")]
    pub creation_settle_ms: u64,

    #[serde(default = "default_table_compute_units")]
    pub compute_units: u32,

    #[serde(default = "default_table_compute_unit_price")]
    pub compute_unit_price: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    #[serde(default = "default_distribution_compute_units")]
    pub compute_units: u32,

    #[serde(default = "default_distribution_compute_unit_price")]
    pub compute_unit_price: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per retried stage (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    /// Confirmation timeout for a single submitted transaction, in seconds
    #[serde(default = "default_tx_confirm_timeout")]
    pub confirm_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Block engine bundle endpoints
    #[serde(default = "default_relay_endpoints")]
    pub endpoints: Vec<String>,

    /// Tip paid to a Jito tip account, in SOL
    #[serde(default = "default_tip")]
    pub tip_sol: f64,

    /// How long to poll for bundle confirmation, in seconds
    #[serde(default = "default_bundle_confirm_timeout")]
    pub confirm_timeout_secs: u64,

    /// HTTP timeout per relay post, in seconds
    #[serde(default = "default_relay_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_image_upload_url")]
    pub image_upload_url: String,

    #[serde(default = "default_metadata_upload_url")]
    pub metadata_upload_url: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub symbol: String,

    #[serde(default)]
    pub description: String,

    /// Local image file uploaded before the run
    #[serde(default)]
    pub image_path: Option<String>,

    #[serde(default = "default_created_on")]
    pub created_on: String,

    #[serde(default = "default_platform_id")]
    pub platform_id: String,

    /// Skip uploading and use this URI directly
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Launchpad program id (base58)
    #[serde(default)]
    pub program_id: String,

    /// 8-byte discriminator of the create instruction
    #[serde(default)]
    pub create_discriminator: Vec<u8>,

    /// 8-byte discriminator of the buy instruction
    #[serde(default)]
    pub buy_discriminator: Vec<u8>,

    /// Read-only protocol accounts every instruction passes (config, authority, platform)
    #[serde(default)]
    pub readonly_accounts: Vec<String>,

    /// Writable protocol accounts every instruction passes (pool, vaults)
    #[serde(default)]
    pub writable_accounts: Vec<String>,

    /// Minimum token output accepted by each buy
    #[serde(default)]
    pub minimum_out: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding key and artifact lists
    #[serde(default = "default_keys_dir")]
    pub keys_dir: String,

    /// Label prefix for identity lists; the run id is appended
    #[serde(default = "default_identity_label")]
    pub identity_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Dump the prometheus registry at the end of a run
    #[serde(default = "default_true")]
    pub dump_metrics: bool,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_identity_count() -> usize { 10 }
fn default_swap_amount() -> f64 { 0.05 }
fn default_identity_fee_buffer() -> f64 { 0.01 }
fn default_fee_reserve() -> f64 { 0.05 }
fn default_vanity_attempts() -> u64 { 5_000_000 }
fn default_max_tx_size() -> usize { 1232 }
fn default_max_compute_units() -> u32 { 1_000_000 }
fn default_group_size() -> usize { 5 }
fn default_compute_unit_price() -> u64 { 200_000 }
fn default_buy_compute_units() -> u32 { 200_000 }
fn default_launch_compute_units() -> u32 { 400_000 }
fn default_max_addresses_per_extend() -> usize { 20 }
fn default_settle_delay_ms() -> u64 { 10_000 }
fn default_creation_settle_ms() -> u64 { 15_000 }
fn default_table_compute_units() -> u32 { 50_000 }
fn default_table_compute_unit_price() -> u64 { 500_000 }
fn default_distribution_compute_units() -> u32 { 1_000_000 }
fn default_distribution_compute_unit_price() -> u64 { 250_000 }
fn default_max_attempts() -> u32 { 5 }
fn default_retry_delay_ms() -> u64 { 2_000 }
fn default_tx_confirm_timeout() -> u64 { 60 }
fn default_relay_endpoints() -> Vec<String> {
    vec![
        "https://ny.mainnet.block-engine.jito.wtf/api/v1/bundles".to_string(),
        "https://tokyo.mainnet.block-engine.jito.wtf/api/v1/bundles".to_string(),
    ]
}
fn default_tip() -> f64 { 0.001 }
fn default_bundle_confirm_timeout() -> u64 { 60 }
fn default_relay_http_timeout() -> u64 { 10 }
fn default_image_upload_url() -> String { "https://storage.letsbonk.fun/upload/img".to_string() }
fn default_metadata_upload_url() -> String { "https://storage.letsbonk.fun/upload/meta".to_string() }
fn default_created_on() -> String { "https://bonk.fun".to_string() }
fn default_platform_id() -> String { "platformId".to_string() }
fn default_keys_dir() -> String { "keys".to_string() }
fn default_identity_label() -> String { "identities".to_string() }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            commitment: default_commitment(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            identity_count: default_identity_count(),
            swap_amount_sol: default_swap_amount(),
            identity_fee_buffer_sol: default_identity_fee_buffer(),
            fee_reserve_sol: default_fee_reserve(),
            vanity_suffix: None,
            vanity_max_attempts: default_vanity_attempts(),
        }
    }
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            max_tx_size: default_max_tx_size(),
            max_compute_units: default_max_compute_units(),
            group_size: default_group_size(),
            compute_unit_price: default_compute_unit_price(),
            buy_compute_units: default_buy_compute_units(),
            launch_compute_units: default_launch_compute_units(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_addresses_per_extend: default_max_addresses_per_extend(),
            settle_delay_ms: default_settle_delay_ms(),
            creation_settle_ms: default_creation_settle_ms(),
            compute_units: default_table_compute_units(),
            compute_unit_price: default_table_compute_unit_price(),
        }
    }
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            compute_units: default_distribution_compute_units(),
            compute_unit_price: default_distribution_compute_unit_price(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
            confirm_timeout_secs: default_tx_confirm_timeout(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoints: default_relay_endpoints(),
            tip_sol: default_tip(),
            confirm_timeout_secs: default_bundle_confirm_timeout(),
            http_timeout_secs: default_relay_http_timeout(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            image_upload_url: default_image_upload_url(),
            metadata_upload_url: default_metadata_upload_url(),
            name: String::new(),
            symbol: String::new(),
            description: String::new(),
            image_path: None,
            created_on: default_created_on(),
            platform_id: default_platform_id(),
            uri: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            keys_dir: default_keys_dir(),
            identity_label: default_identity_label(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_json: false,
            dump_metrics: default_true(),
        }
    }
}

/// Convert a SOL amount from configuration to lamports.
pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

impl Config {
    /// Load configuration from an optional file plus `LAUNCH__*` overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("LAUNCH")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("relay.endpoints")
                .with_list_parse_key("protocol.readonly_accounts")
                .with_list_parse_key("protocol.writable_accounts")
                .try_parsing(true),
        );

        let mut cfg: Config = builder
            .build()
            .context("Failed to assemble configuration sources")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if let Ok(key) = std::env::var("PRIVATE_KEY") {
            if !key.trim().is_empty() {
                cfg.wallet.private_key = Some(key);
            }
        }

        Ok(cfg)
    }

    /// Reject values that would make a run meaningless or unsafe
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.launch.identity_count == 0 {
            bail!("launch.identity_count must be at least 1");
        }
        let amounts = [
            ("launch.swap_amount_sol", self.launch.swap_amount_sol),
            ("launch.identity_fee_buffer_sol", self.launch.identity_fee_buffer_sol),
            ("launch.fee_reserve_sol", self.launch.fee_reserve_sol),
            ("relay.tip_sol", self.relay.tip_sol),
        ];
        for (name, sol) in amounts {
            if !sol.is_finite() || sol < 0.0 {
                bail!("{name} must be a finite, non-negative SOL amount, got {sol}");
            }
        }
        if self.launch.swap_amount_sol == 0.0 {
            bail!("launch.swap_amount_sol must be positive");
        }
        if self.packing.group_size == 0 {
            bail!("packing.group_size must be at least 1");
        }
        if self.packing.max_tx_size == 0 || self.packing.max_compute_units == 0 {
            bail!("packing ceilings must be positive");
        }
        if self.table.max_addresses_per_extend == 0 {
            bail!("table.max_addresses_per_extend must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.relay.endpoints.is_empty() {
            bail!("relay.endpoints must list at least one block engine");
        }
        if self.wallet.private_key.is_none() && self.wallet.keypair_path.is_none() {
            bail!("no funding identity: set PRIVATE_KEY, wallet.private_key or wallet.keypair_path");
        }
        if !self.protocol.program_id.is_empty() {
            Pubkey::from_str(&self.protocol.program_id)
                .context("protocol.program_id is not a valid address")?;
        }
        for account in self.protocol.readonly_accounts.iter().chain(&self.protocol.writable_accounts) {
            Pubkey::from_str(account)
                .with_context(|| format!("protocol account {account} is not a valid address"))?;
        }
        Ok(())
    }

    /// Retry policy shared by the distributor and the table builder
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_attempts, Duration::from_millis(self.retry.delay_ms))
    }

    /// Per-identity transfer: the swap amount plus the fee buffer
    pub fn per_identity_lamports(&self) -> u64 {
        sol_to_lamports(self.launch.swap_amount_sol + self.launch.identity_fee_buffer_sol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.packing.max_tx_size, 1232);
        assert_eq!(cfg.table.max_addresses_per_extend, 20);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.relay.endpoints.len(), 2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[launch]
identity_count = 8
swap_amount_sol = 0.05

[wallet]
keypair_path = "/tmp/id.json"
"#
        )
        .unwrap();

        let cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.launch.identity_count, 8);
        assert_eq!(cfg.wallet.keypair_path.as_deref(), Some("/tmp/id.json"));
        assert_eq!(cfg.table.settle_delay_ms, 10_000);
    }

    #[test]
    fn test_validate_rejects_missing_wallet() {
        let mut cfg = Config::default();
        cfg.wallet = WalletConfig::default();
        std::env::remove_var("PRIVATE_KEY");
        assert!(cfg.validate().is_err());

        cfg.wallet.keypair_path = Some("id.json".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_tip() {
        let mut cfg = Config::default();
        cfg.wallet.keypair_path = Some("id.json".to_string());
        assert!(cfg.validate().is_ok());

        for tip in [-0.001, f64::NAN, f64::INFINITY] {
            cfg.relay.tip_sol = tip;
            let err = cfg.validate().unwrap_err().to_string();
            assert!(err.contains("relay.tip_sol"), "{err}");
        }

        cfg.relay.tip_sol = 0.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_per_identity_amount() {
        let mut cfg = Config::default();
        cfg.launch.swap_amount_sol = 0.05;
        cfg.launch.identity_fee_buffer_sol = 0.01;
        assert_eq!(cfg.per_identity_lamports(), 60_000_000);
    }
}
