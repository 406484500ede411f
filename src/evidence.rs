//! Performance evidence snapshots from the external scoring job
//!
//! The pipeline only ever reads these; the scoring job refreshes them on its
//! own cadence. A snapshot past the freshness threshold is treated as absent,
//! never as "zero performance".

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::PolicyLevel;

/// Aggregate performance evidence across all symbols
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalEvidence {
    /// Profit factor over the rolling 7-day window
    pub pf_7d: f64,
    /// Profit factor over the rolling 30-day window
    pub pf_30d: f64,
    /// Trade count over the rolling 30-day window
    pub trades_30d: u32,
    /// Max drawdown over the window, as a fraction (0.10 = 10%)
    pub max_drawdown_pct: f64,
}

/// Per-symbol performance evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEvidence {
    pub pf_7d: f64,
    pub pf_30d: f64,
    pub trades_30d: u32,
    pub policy_level: PolicyLevel,
}

/// Immutable evidence snapshot produced by the scoring job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    pub generated_at: DateTime<Utc>,
    /// Age as reported by the producer at publish time
    #[serde(default)]
    pub age_seconds: u64,
    pub global: GlobalEvidence,
    pub by_symbol: HashMap<String, SymbolEvidence>,
}

impl EvidenceSnapshot {
    /// Whether this snapshot is still usable at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.generated_at) <= max_age
    }

    /// Evidence for a single symbol, if the scoring job covered it
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolEvidence> {
        self.by_symbol.get(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(generated_at: DateTime<Utc>) -> EvidenceSnapshot {
        EvidenceSnapshot {
            generated_at,
            age_seconds: 0,
            global: GlobalEvidence {
                pf_7d: 1.10,
                pf_30d: 1.10,
                trades_30d: 150,
                max_drawdown_pct: 0.05,
            },
            by_symbol: HashMap::new(),
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Utc::now();
        let fresh = snapshot(now - Duration::minutes(89));
        let stale = snapshot(now - Duration::minutes(91));

        assert!(fresh.is_fresh(now, Duration::minutes(90)));
        assert!(!stale.is_fresh(now, Duration::minutes(90)));
    }
}
