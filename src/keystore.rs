//! Durable append-only key and artifact lists
//!
//! Each label maps to `<dir>/<label>.json`, a JSON array of strings. Appends
//! rewrite the whole list into a temp file in the same directory, fsync it
//! and rename it over the old file, so readers observe either the previous
//! list or the extended one. Existing entries are never reordered or dropped.

use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Label under which the mint identity is recorded
pub const MINT_LABEL: &str = "mint";
/// Label under which created lookup tables are recorded
pub const TABLE_LABEL: &str = "lut";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Invalid key store label '{0}'")]
    InvalidLabel(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The existing list could not be parsed; it is left untouched
    #[error("Corrupt key file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Key store task failed: {0}")]
    Task(String),
}

/// Directory of append-only JSON lists
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `label`
    pub fn path_for(&self, label: &str) -> Result<PathBuf, PersistenceError> {
        validate_label(label)?;
        Ok(self.dir.join(format!("{label}.json")))
    }

    /// Read the list stored under `label`; an absent file is an empty list
    pub fn read(&self, label: &str) -> Result<Zeroizing<Vec<String>>, PersistenceError> {
        let path = self.path_for(label)?;
        read_list(&path)
    }

    /// Append `entries` to the list under `label` and return its path.
    ///
    /// The write is durable when this returns.
    pub fn append<S: AsRef<str>>(&self, label: &str, entries: &[S]) -> Result<PathBuf, PersistenceError> {
        let path = self.path_for(label)?;

        fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut list = read_list(&path)?;
        list.extend(entries.iter().map(|e| e.as_ref().to_string()));

        let body = Zeroizing::new(
            serde_json::to_vec_pretty(&*list).map_err(|e| PersistenceError::Serialization(e.to_string()))?,
        );

        let io_err = |source| PersistenceError::Io {
            path: path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(&body).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        debug!(
            label = label,
            appended = entries.len(),
            total = list.len(),
            path = %path.display(),
            "Key store list updated"
        );
        Ok(path)
    }

    /// [`append`](Self::append) on a blocking thread, for callers on the
    /// async runtime
    pub async fn append_async(
        &self,
        label: &str,
        entries: Vec<Zeroizing<String>>,
    ) -> Result<PathBuf, PersistenceError> {
        let store = self.clone();
        let label = label.to_string();
        tokio::task::spawn_blocking(move || {
            let entries: Vec<&str> = entries.iter().map(|e| e.as_str()).collect();
            store.append(&label, &entries)
        })
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))?
    }
}

fn read_list(path: &Path) -> Result<Zeroizing<Vec<String>>, PersistenceError> {
    let raw = match fs::read(path) {
        Ok(raw) => Zeroizing::new(raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Zeroizing::new(Vec::new())),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Zeroizing::new(Vec::new()));
    }

    let corrupt = |reason: String| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value = serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(corrupt("expected a JSON array".to_string()));
    };

    let mut list = Zeroizing::new(Vec::with_capacity(items.len()));
    for item in items {
        match item {
            Value::String(s) => list.push(s),
            other => return Err(corrupt(format!("non-string entry: {other}"))),
        }
    }
    Ok(list)
}

fn validate_label(label: &str) -> Result<(), PersistenceError> {
    let valid = !label.is_empty()
        && label != "."
        && label != ".."
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidLabel(label.to_string()))
    }
}
