//! Identity management: the funding wallet, ephemeral identities and the mint
//!
//! Ephemeral identities are generated fresh per run and persisted before they
//! are handed out. Nothing is ever re-derived from a seed.

use anyhow::{bail, Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::WalletConfig;
use crate::keystore::{KeyStore, PersistenceError};

/// Load the funding identity from a base58 secret string
pub fn funder_from_base58(secret: &str) -> Result<Keypair> {
    let bytes = Zeroizing::new(
        bs58::decode(secret.trim())
            .into_vec()
            .context("Funding key is not valid base58")?,
    );
    keypair_from_bytes(&bytes)
}

/// Load the funding identity from a keypair file (raw 64 bytes or JSON array)
pub fn funder_from_file(path: &Path) -> Result<Keypair> {
    let raw = Zeroizing::new(
        std::fs::read(path).with_context(|| format!("Failed to read keypair file: {}", path.display()))?,
    );

    if raw.len() == 64 {
        return keypair_from_bytes(&raw);
    }

    let json: Zeroizing<Vec<u8>> =
        Zeroizing::new(serde_json::from_slice(&raw).context("Failed to parse keypair JSON")?);
    keypair_from_bytes(&json)
}

/// Load the funding identity named by the wallet section; an inline secret wins over a file
pub fn load_funder(wallet: &WalletConfig) -> Result<Keypair> {
    if let Some(secret) = wallet.private_key.as_deref().filter(|s| !s.trim().is_empty()) {
        return funder_from_base58(secret);
    }
    match wallet.keypair_path.as_deref() {
        Some(path) => funder_from_file(Path::new(path)),
        None => bail!("No funding identity configured"),
    }
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != 64 {
        bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
    }
    if bytes.iter().all(|&b| b == 0) {
        bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes).context("Invalid keypair bytes")
}

/// Base58 form of a keypair's 64-byte secret, as persisted in key files
pub fn secret_base58(keypair: &Keypair) -> Zeroizing<String> {
    let bytes = Zeroizing::new(keypair.to_bytes());
    Zeroizing::new(bs58::encode(&bytes[..]).into_string())
}

/// Signing keys available to the packer, by address
#[derive(Default, Clone)]
pub struct Keyring {
    keys: HashMap<Pubkey, Arc<Keypair>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keypair: Arc<Keypair>) {
        self.keys.insert(keypair.pubkey(), keypair);
    }

    pub fn get(&self, address: &Pubkey) -> Option<&Keypair> {
        self.keys.get(address).map(|k| k.as_ref())
    }

    pub fn contains(&self, address: &Pubkey) -> bool {
        self.keys.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring").field("signers", &self.keys.keys().collect::<Vec<_>>()).finish()
    }
}

/// Ephemeral identities generated for one run
pub struct IdentityPool {
    identities: Vec<Arc<Keypair>>,
    path: PathBuf,
}

impl IdentityPool {
    /// Generate `n` fresh identities and persist their secrets under `label`
    /// before returning. A persistence failure drops the keys unfunded.
    pub async fn generate(n: usize, store: &KeyStore, label: &str) -> Result<Self, PersistenceError> {
        let identities: Vec<Arc<Keypair>> = (0..n).map(|_| Arc::new(Keypair::new())).collect();

        let secrets: Vec<Zeroizing<String>> = identities.iter().map(|k| secret_base58(k)).collect();
        let path = store.append_async(label, secrets).await?;

        info!(count = n, label = label, path = %path.display(), "🔑 Generated ephemeral identities");
        Ok(Self { identities, path })
    }

    pub fn identities(&self) -> &[Arc<Keypair>] {
        &self.identities
    }

    pub fn pubkeys(&self) -> Vec<Pubkey> {
        self.identities.iter().map(|k| k.pubkey()).collect()
    }

    /// Key file the secrets were written to
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Add every identity to `keyring`
    pub fn register(&self, keyring: &mut Keyring) {
        for identity in &self.identities {
            keyring.insert(identity.clone());
        }
    }
}

/// Generate a keypair whose base58 address ends with `suffix`.
///
/// Runs on a blocking thread. Returns `None` after `max_attempts` misses.
pub async fn generate_vanity(suffix: String, max_attempts: u64) -> Result<Option<Keypair>> {
    if suffix.is_empty() {
        return Ok(Some(Keypair::new()));
    }
    if bs58::decode(&suffix).into_vec().is_err() {
        bail!("Vanity suffix '{suffix}' contains non-base58 characters");
    }

    let found = tokio::task::spawn_blocking(move || {
        for _ in 0..max_attempts {
            let keypair = Keypair::new();
            if keypair.pubkey().to_string().ends_with(&suffix) {
                return Some(keypair);
            }
        }
        None
    })
    .await
    .context("Vanity search task panicked")?;

    if found.is_none() {
        warn!(max_attempts, "Vanity suffix not found within attempt bound");
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_generate_persists_before_return() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());

        let pool = IdentityPool::generate(8, &store, "identities-run1").await.unwrap();
        assert_eq!(pool.len(), 8);

        let distinct: HashSet<Pubkey> = pool.pubkeys().into_iter().collect();
        assert_eq!(distinct.len(), 8);

        let saved = store.read("identities-run1").unwrap();
        assert_eq!(saved.len(), 8);
        for (secret, identity) in saved.iter().zip(pool.identities()) {
            let restored = funder_from_base58(secret).unwrap();
            assert_eq!(restored.pubkey(), identity.pubkey());
        }
    }

    #[tokio::test]
    async fn test_generate_fails_when_store_unwritable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let store = KeyStore::new(&blocker);
        assert!(IdentityPool::generate(3, &store, "ids").await.is_err());
    }

    #[test]
    fn test_funder_round_trip_formats() {
        let dir = TempDir::new().unwrap();
        let keypair = Keypair::new();

        let json_path = dir.path().join("id.json");
        std::fs::write(&json_path, serde_json::to_vec(&keypair.to_bytes().to_vec()).unwrap()).unwrap();
        assert_eq!(funder_from_file(&json_path).unwrap().pubkey(), keypair.pubkey());

        let raw_path = dir.path().join("id.bin");
        std::fs::write(&raw_path, keypair.to_bytes()).unwrap();
        assert_eq!(funder_from_file(&raw_path).unwrap().pubkey(), keypair.pubkey());

        let b58 = keypair.to_base58_string();
        assert_eq!(funder_from_base58(&b58).unwrap().pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_load_funder_prefers_inline_secret() {
        let dir = TempDir::new().unwrap();
        let inline = Keypair::new();
        let on_disk = Keypair::new();
        let path = dir.path().join("id.json");
        std::fs::write(&path, serde_json::to_vec(&on_disk.to_bytes().to_vec()).unwrap()).unwrap();

        let mut wallet = WalletConfig {
            private_key: Some(inline.to_base58_string()),
            keypair_path: Some(path.display().to_string()),
        };
        assert_eq!(load_funder(&wallet).unwrap().pubkey(), inline.pubkey());

        wallet.private_key = None;
        assert_eq!(load_funder(&wallet).unwrap().pubkey(), on_disk.pubkey());

        wallet.keypair_path = None;
        assert!(load_funder(&wallet).is_err());
    }

    #[test]
    fn test_rejects_zero_and_short_keys() {
        assert!(funder_from_base58(&bs58::encode([0u8; 64]).into_string()).is_err());
        assert!(funder_from_base58(&bs58::encode([7u8; 32]).into_string()).is_err());
        assert!(funder_from_base58("0OIl").is_err());
    }

    #[test]
    fn test_keyring_lookup() {
        let mut keyring = Keyring::new();
        let key = Arc::new(Keypair::new());
        keyring.insert(key.clone());
        assert!(keyring.contains(&key.pubkey()));
        assert_eq!(keyring.get(&key.pubkey()).unwrap().pubkey(), key.pubkey());
        assert!(keyring.get(&Pubkey::new_unique()).is_none());
    }

    #[tokio::test]
    async fn test_vanity_single_char() {
        let keypair = generate_vanity("a".to_string(), 100_000).await.unwrap().unwrap();
        assert!(keypair.pubkey().to_string().ends_with('a'));
    }

    #[tokio::test]
    async fn test_vanity_rejects_invalid_suffix() {
        assert!(generate_vanity("0".to_string(), 10).await.is_err());
    }
}
