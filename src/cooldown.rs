//! Cooldown bookkeeping for the rotation engine
//!
//! One registry keyed by (symbol, kind) replaces the three near-identical
//! per-kind maps: precedence is fixed here, and expired entries are evicted
//! the first time they are observed, so diagnostics never report a stale
//! "still cooling down".

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Why a symbol is cooling down. Declaration order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownKind {
    /// Set after a take-profit exit
    TargetHit,
    /// Set after any non-target exit
    PostClose,
    /// Set when a candidate fails the signal check
    NoSignal,
}

impl CooldownKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownKind::TargetHit => "target_hit",
            CooldownKind::PostClose => "post_close",
            CooldownKind::NoSignal => "no_signal",
        }
    }

    const PRECEDENCE: [CooldownKind; 3] = [
        CooldownKind::TargetHit,
        CooldownKind::PostClose,
        CooldownKind::NoSignal,
    ];
}

impl std::fmt::Display for CooldownKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entry currently blocking a symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCooldown {
    pub kind: CooldownKind,
    pub remaining: Duration,
}

/// All cooldown state for one executor lane
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CooldownRegistry {
    /// symbol -> kind -> expiry
    entries: HashMap<String, HashMap<CooldownKind, DateTime<Utc>>>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a cooldown until `expires_at`. Target-hit and post-close are
    /// mutually exclusive: arming one clears the other for that symbol.
    pub fn set(&mut self, symbol: &str, kind: CooldownKind, expires_at: DateTime<Utc>) {
        let per_symbol = self.entries.entry(symbol.to_string()).or_default();

        match kind {
            CooldownKind::TargetHit => {
                per_symbol.remove(&CooldownKind::PostClose);
            }
            CooldownKind::PostClose => {
                per_symbol.remove(&CooldownKind::TargetHit);
            }
            CooldownKind::NoSignal => {}
        }

        per_symbol.insert(kind, expires_at);
        debug!("Cooldown armed: {} {} until {}", symbol, kind, expires_at);
    }

    /// Highest-precedence active cooldown for a symbol, evicting anything
    /// already expired along the way.
    pub fn is_active(&mut self, symbol: &str, now: DateTime<Utc>) -> Option<ActiveCooldown> {
        let per_symbol = self.entries.get_mut(symbol)?;

        per_symbol.retain(|kind, expires_at| {
            let live = *expires_at > now;
            if !live {
                debug!("Cooldown expired: {} {}", symbol, kind);
            }
            live
        });

        let hit = CooldownKind::PRECEDENCE.iter().find_map(|kind| {
            per_symbol
                .get(kind)
                .map(|expires_at| ActiveCooldown {
                    kind: *kind,
                    remaining: expires_at.signed_duration_since(now),
                })
        });

        if per_symbol.is_empty() {
            self.entries.remove(symbol);
        }
        hit
    }

    /// Evict every expired entry across all symbols
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, per_symbol| {
            per_symbol.retain(|_, expires_at| *expires_at > now);
            !per_symbol.is_empty()
        });
    }

    /// Number of symbols with at least one entry (expired or not)
    pub fn tracked_symbols(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_precedence_target_over_no_signal() {
        let mut reg = CooldownRegistry::new();
        let now = t0();
        reg.set("SOL", CooldownKind::NoSignal, now + Duration::minutes(5));
        reg.set("SOL", CooldownKind::TargetHit, now + Duration::minutes(15));

        let active = reg.is_active("SOL", now).unwrap();
        assert_eq!(active.kind, CooldownKind::TargetHit);
        assert_eq!(active.remaining, Duration::minutes(15));
    }

    #[test]
    fn test_target_and_post_close_mutually_exclusive() {
        let mut reg = CooldownRegistry::new();
        let now = t0();
        reg.set("SOL", CooldownKind::PostClose, now + Duration::minutes(10));
        reg.set("SOL", CooldownKind::TargetHit, now + Duration::minutes(15));

        // PostClose must be gone; only TargetHit remains
        let active = reg.is_active("SOL", now + Duration::minutes(14)).unwrap();
        assert_eq!(active.kind, CooldownKind::TargetHit);

        // And the other way around
        reg.set("SOL", CooldownKind::PostClose, now + Duration::minutes(30));
        let active = reg.is_active("SOL", now + Duration::minutes(16)).unwrap();
        assert_eq!(active.kind, CooldownKind::PostClose);
    }

    #[test]
    fn test_lazy_eviction_is_permanent() {
        let mut reg = CooldownRegistry::new();
        let now = t0();
        reg.set("SOL", CooldownKind::NoSignal, now + Duration::minutes(5));

        assert!(reg.is_active("SOL", now + Duration::minutes(4)).is_some());

        // Expired: never blocking again, and the entry is gone from state
        assert!(reg.is_active("SOL", now + Duration::minutes(5)).is_none());
        assert_eq!(reg.tracked_symbols(), 0);
        assert!(reg.is_active("SOL", now + Duration::minutes(6)).is_none());
    }

    #[test]
    fn test_prune_sweeps_all_symbols() {
        let mut reg = CooldownRegistry::new();
        let now = t0();
        reg.set("SOL", CooldownKind::NoSignal, now + Duration::minutes(5));
        reg.set("ETH", CooldownKind::PostClose, now + Duration::minutes(10));

        reg.prune(now + Duration::minutes(7));
        assert_eq!(reg.tracked_symbols(), 1);
        assert!(reg.is_active("ETH", now + Duration::minutes(7)).is_some());
    }

    #[test]
    fn test_registry_round_trips_through_json() {
        let mut reg = CooldownRegistry::new();
        let now = t0();
        reg.set("SOL", CooldownKind::TargetHit, now + Duration::minutes(15));

        let json = serde_json::to_string(&reg).unwrap();
        let mut back: CooldownRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.is_active("SOL", now).unwrap().kind,
            CooldownKind::TargetHit
        );
    }
}
