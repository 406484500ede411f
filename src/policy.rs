//! Exploration policy file
//!
//! An optional YAML document naming the symbols the probe lane may explore,
//! with per-symbol confidence-floor overrides. Whether a missing file permits
//! probing is an explicit config flag, so the safety posture is auditable
//! instead of being implied by the trading mode.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Per-symbol policy entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolPolicy {
    #[serde(default = "default_allowed")]
    pub allowed: bool,
    /// Overrides the regime-derived entry floor when set
    #[serde(default)]
    pub confidence_floor: Option<f64>,
}

fn default_allowed() -> bool {
    true
}

/// The policy document as written by operators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    /// Symbols not listed here fall back to `default_allowed`
    #[serde(default)]
    pub symbols: HashMap<String, SymbolPolicy>,
    /// What an unlisted symbol gets
    #[serde(default = "default_allowed")]
    pub default_allowed: bool,
}

/// Loaded policy, including the missing-file posture
#[derive(Debug, Clone)]
pub struct ExplorationPolicy {
    file: Option<PolicyFile>,
    allow_on_missing: bool,
}

impl ExplorationPolicy {
    /// Load from `path`. A missing file is not an error; its effect is
    /// decided by `allow_on_missing`.
    pub fn load(path: Option<&Path>, allow_on_missing: bool) -> Result<Self> {
        let file = match path {
            None => None,
            Some(p) if !p.exists() => {
                warn!(
                    "Exploration policy file {} missing; probing {}",
                    p.display(),
                    if allow_on_missing { "allowed" } else { "barred" }
                );
                None
            }
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("reading policy file {}", p.display()))?;
                let parsed: PolicyFile = serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing policy file {}", p.display()))?;
                info!(
                    "Exploration policy loaded: {} symbols listed",
                    parsed.symbols.len()
                );
                Some(parsed)
            }
        };

        Ok(Self {
            file,
            allow_on_missing,
        })
    }

    /// Policy with no file configured at all
    pub fn unconfigured(allow_on_missing: bool) -> Self {
        Self {
            file: None,
            allow_on_missing,
        }
    }

    /// Whether the probe lane may explore this symbol
    pub fn allows(&self, symbol: &str) -> bool {
        match &self.file {
            None => self.allow_on_missing,
            Some(f) => f
                .symbols
                .get(symbol)
                .map(|s| s.allowed)
                .unwrap_or(f.default_allowed),
        }
    }

    /// Per-symbol confidence floor override, if the file sets one
    pub fn floor_override(&self, symbol: &str) -> Option<f64> {
        self.file
            .as_ref()
            .and_then(|f| f.symbols.get(symbol))
            .and_then(|s| s.confidence_floor)
    }
}
