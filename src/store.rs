//! Durable JSON state documents
//!
//! One document per component at a stable key, one writer per document.
//! Writes go through a temp file and rename so a concurrent reader never
//! observes a partial document. Every document carries a schema version and
//! is upgraded explicitly on read.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub const SHADOW_GATE_KEY: &str = "shadow-gate";
pub const PROBE_EXECUTOR_KEY: &str = "probe-executor";
pub const PROMOTION_GATE_KEY: &str = "promotion-gate";
pub const ROTATION_ENGINE_KEY: &str = "rotation-engine";
pub const PROBE_TRADE_LOG_KEY: &str = "probe-trade-log";

pub const SHADOW_GATE_SCHEMA_VERSION: u32 = 1;
pub const PROBE_EXECUTOR_SCHEMA_VERSION: u32 = 1;
pub const PROMOTION_GATE_SCHEMA_VERSION: u32 = 1;
pub const ROTATION_ENGINE_SCHEMA_VERSION: u32 = 1;
pub const TRADE_LOG_SCHEMA_VERSION: u32 = 1;

/// A persisted document bound to a stable key with an explicit upgrade path
pub trait StateDocument: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const SCHEMA_VERSION: u32;

    /// Upgrade a raw document written at schema `from` to the current
    /// schema, in place. Serde field defaults handle additive fields; this
    /// hook exists for renames and shape changes.
    fn migrate(from: u32, raw: &mut serde_json::Value) {
        let _ = (from, raw);
    }
}

/// Filesystem-backed store, one JSON file per document key
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location under the user's home directory
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/root"))
            .join(".exposure-gate")
            .join("state")
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating state dir {}", self.dir.display()))?;
        Ok(())
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Load and migrate a document; `None` when it has never been written
    pub async fn load<T: StateDocument>(&self) -> Result<Option<T>> {
        let path = self.path_for(T::KEY);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        let mut raw: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;

        let found = raw
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        if found > T::SCHEMA_VERSION {
            // A newer writer owns this document; refuse rather than guess
            bail!(
                "document {} has schema {} but this build understands {}",
                T::KEY,
                found,
                T::SCHEMA_VERSION
            );
        }

        if found < T::SCHEMA_VERSION {
            warn!(
                "Migrating document {} from schema {} to {}",
                T::KEY,
                found,
                T::SCHEMA_VERSION
            );
            T::migrate(found, &mut raw);
            if let Some(obj) = raw.as_object_mut() {
                obj.insert(
                    "schema_version".to_string(),
                    serde_json::json!(T::SCHEMA_VERSION),
                );
            }
        }

        let doc: T = serde_json::from_value(raw)
            .with_context(|| format!("decoding {} after migration", T::KEY))?;
        Ok(Some(doc))
    }

    /// Write a document atomically (temp file + rename)
    pub async fn save<T: StateDocument>(&self, doc: &T) -> Result<()> {
        let path = self.path_for(T::KEY);
        let tmp = self.dir.join(format!("{}.json.tmp", T::KEY));

        let json = serde_json::to_string_pretty(doc).context("serializing state document")?;
        fs::write(&tmp, json.as_bytes())
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming {} into place", tmp.display()))?;

        debug!("Wrote state document {}", T::KEY);
        Ok(())
    }

    /// Raw bytes of a document, for diagnostics and invariant checks
    pub async fn raw_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("reading raw document"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
