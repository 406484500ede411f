//! Shadow Gate
//!
//! Decides from aggregate evidence whether the low-risk probe lane may
//! activate at all. Disable conditions short-circuit in priority order;
//! enabling requires every condition to hold. Anything unexpected fails
//! closed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ShadowConfig;
use crate::evidence::EvidenceSnapshot;
use crate::providers::QuarantineList;
use crate::store::{StateDocument, SHADOW_GATE_KEY, SHADOW_GATE_SCHEMA_VERSION};
use crate::types::{CircuitMode, GateError};

/// How the gate arrived at its enabled/disabled answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecisionKind {
    AutoEnabled,
    Hold,
    AutoDisabled,
}

impl std::fmt::Display for GateDecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateDecisionKind::AutoEnabled => write!(f, "auto_enabled"),
            GateDecisionKind::Hold => write!(f, "hold"),
            GateDecisionKind::AutoDisabled => write!(f, "auto_disabled"),
        }
    }
}

/// Output of one gate evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub enabled: bool,
    pub decision: GateDecisionKind,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
    pub last_auto_disable_at: Option<DateTime<Utc>>,
}

impl GateDecision {
    fn disabled(
        reason: impl Into<String>,
        now: DateTime<Utc>,
        last_auto_disable_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            enabled: false,
            decision: GateDecisionKind::AutoDisabled,
            reason: reason.into(),
            evaluated_at: now,
            last_auto_disable_at,
        }
    }

    fn hold(
        reason: impl Into<String>,
        now: DateTime<Utc>,
        last_auto_disable_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            enabled: false,
            decision: GateDecisionKind::Hold,
            reason: reason.into(),
            evaluated_at: now,
            last_auto_disable_at,
        }
    }
}

/// Persisted shadow-gate document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowGateState {
    #[serde(default)]
    pub schema_version: u32,
    /// Most recent decision, kept for operators and the promotion gate
    #[serde(default)]
    pub last: Option<GateDecision>,
    #[serde(default)]
    pub last_auto_disable_at: Option<DateTime<Utc>>,
    /// When the gate last reported auto_enabled; drives the promotion
    /// gate's grace window
    #[serde(default)]
    pub last_enabled_at: Option<DateTime<Utc>>,
}

impl ShadowGateState {
    pub fn new() -> Self {
        Self {
            schema_version: SHADOW_GATE_SCHEMA_VERSION,
            ..Default::default()
        }
    }
}

impl StateDocument for ShadowGateState {
    const KEY: &'static str = SHADOW_GATE_KEY;
    const SCHEMA_VERSION: u32 = SHADOW_GATE_SCHEMA_VERSION;
}

/// The gate itself
pub struct ShadowGate {
    config: ShadowConfig,
    quarantine: Arc<dyn QuarantineList>,
}

impl ShadowGate {
    pub fn new(config: ShadowConfig, quarantine: Arc<dyn QuarantineList>) -> Self {
        Self { config, quarantine }
    }

    /// Evaluate the gate for this tick. Mutates `state` (disable/enable
    /// timestamps and the cached decision); the caller persists it.
    ///
    /// `mode` is `None` when the circuit breaker could not be read; that is
    /// an input failure and the gate fails closed.
    pub async fn evaluate(
        &self,
        now: DateTime<Utc>,
        mode: Option<CircuitMode>,
        snapshot: Option<&EvidenceSnapshot>,
        probe_losses_24h: usize,
        state: &mut ShadowGateState,
    ) -> GateDecision {
        let decision = match self.evaluate_inner(now, mode, snapshot, probe_losses_24h, state).await
        {
            Ok(d) => d,
            Err(e) => {
                error!(
                    "Shadow gate evaluation failed ({}): {} - failing closed",
                    e.classification(),
                    e
                );
                GateDecision::disabled(
                    format!("internal_error: {}", e),
                    now,
                    state.last_auto_disable_at,
                )
            }
        };

        if decision.decision == GateDecisionKind::AutoEnabled {
            state.last_enabled_at = Some(now);
        }
        state.last = Some(decision.clone());
        decision
    }

    async fn evaluate_inner(
        &self,
        now: DateTime<Utc>,
        mode: Option<CircuitMode>,
        snapshot: Option<&EvidenceSnapshot>,
        probe_losses_24h: usize,
        state: &mut ShadowGateState,
    ) -> Result<GateDecision, GateError> {
        let cfg = &self.config;

        // (a) The probe lane only runs under the halt-new-entries posture
        let mode = mode.ok_or_else(|| {
            GateError::InputUnavailable("circuit_mode_unavailable".to_string())
        })?;
        if mode != CircuitMode::HaltNewEntries {
            return Ok(GateDecision::disabled(
                format!("capital_mode_not_halt_new_entries: {}", mode),
                now,
                state.last_auto_disable_at,
            ));
        }

        // (b) Stale evidence is absent evidence, never zero performance
        let max_age = Duration::minutes(cfg.evidence_max_age_minutes);
        let snapshot = match snapshot {
            Some(s) if s.is_fresh(now, max_age) => s,
            _ => {
                return Ok(GateDecision::disabled(
                    "evidence_stale_or_absent",
                    now,
                    state.last_auto_disable_at,
                ));
            }
        };

        // (c) Hard floor on the 7-day profit factor
        if snapshot.global.pf_7d < cfg.pf7d_disable_floor {
            state.last_auto_disable_at = Some(now);
            warn!(
                "Shadow gate auto-disable: pf7d {:.3} below floor {:.3}",
                snapshot.global.pf_7d, cfg.pf7d_disable_floor
            );
            return Ok(GateDecision::disabled(
                format!(
                    "global_pf7d_below_disable_floor: {:.3} < {:.3}",
                    snapshot.global.pf_7d, cfg.pf7d_disable_floor
                ),
                now,
                state.last_auto_disable_at,
            ));
        }

        // (d) Too many probe losses in the rolling 24h
        if probe_losses_24h >= cfg.max_probe_losses_24h {
            state.last_auto_disable_at = Some(now);
            warn!(
                "Shadow gate auto-disable: {} probe losses in 24h",
                probe_losses_24h
            );
            return Ok(GateDecision::disabled(
                format!(
                    "probe_losses_24h_limit: {} >= {}",
                    probe_losses_24h, cfg.max_probe_losses_24h
                ),
                now,
                state.last_auto_disable_at,
            ));
        }

        // (e) Hold-down after a recent auto-disable; not a fresh disable
        if let Some(disabled_at) = state.last_auto_disable_at {
            let hold = Duration::hours(cfg.disable_cooldown_hours);
            if now.signed_duration_since(disabled_at) < hold {
                return Ok(GateDecision::hold(
                    format!(
                        "auto_disable_cooldown_active: disabled_at={}",
                        disabled_at.to_rfc3339()
                    ),
                    now,
                    state.last_auto_disable_at,
                ));
            }
        }

        // Enable ladder: all conditions required, first failure named
        let g = &snapshot.global;
        if g.pf_7d < cfg.pf7d_enable_floor {
            return Ok(GateDecision::hold(
                format!(
                    "global_pf7d_below_enable_floor: {:.3} < {:.3}",
                    g.pf_7d, cfg.pf7d_enable_floor
                ),
                now,
                state.last_auto_disable_at,
            ));
        }
        if g.pf_30d < cfg.pf30d_enable_floor {
            return Ok(GateDecision::hold(
                format!(
                    "global_pf30d_below_enable_floor: {:.3} < {:.3}",
                    g.pf_30d, cfg.pf30d_enable_floor
                ),
                now,
                state.last_auto_disable_at,
            ));
        }
        if g.trades_30d < cfg.trades30d_min {
            return Ok(GateDecision::hold(
                format!(
                    "global_trades30d_insufficient: {} < {}",
                    g.trades_30d, cfg.trades30d_min
                ),
                now,
                state.last_auto_disable_at,
            ));
        }
        if g.max_drawdown_pct > cfg.max_drawdown {
            return Ok(GateDecision::hold(
                format!(
                    "global_drawdown_above_limit: {:.3} > {:.3}",
                    g.max_drawdown_pct, cfg.max_drawdown
                ),
                now,
                state.last_auto_disable_at,
            ));
        }

        if !self.any_eligible_symbol(snapshot).await? {
            return Ok(GateDecision::hold(
                "no_eligible_symbol",
                now,
                state.last_auto_disable_at,
            ));
        }

        info!("Shadow gate auto-enabled");
        Ok(GateDecision {
            enabled: true,
            decision: GateDecisionKind::AutoEnabled,
            reason: "all_enable_conditions_met".to_string(),
            evaluated_at: now,
            last_auto_disable_at: state.last_auto_disable_at,
        })
    }

    /// At least one non-quarantined symbol clearing the per-symbol floors
    async fn any_eligible_symbol(
        &self,
        snapshot: &EvidenceSnapshot,
    ) -> Result<bool, GateError> {
        let cfg = &self.config;
        for (symbol, ev) in &snapshot.by_symbol {
            if ev.pf_30d < cfg.symbol_pf30d_min || ev.trades_30d < cfg.symbol_trades30d_min {
                continue;
            }
            if !self.quarantine.is_quarantined(symbol).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{GlobalEvidence, SymbolEvidence};
    use crate::types::PolicyLevel;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};

    struct SetQuarantine(HashSet<String>);

    #[async_trait]
    impl QuarantineList for SetQuarantine {
        async fn is_quarantined(&self, symbol: &str) -> Result<bool, GateError> {
            Ok(self.0.contains(symbol))
        }
    }

    fn t0() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    fn healthy_snapshot(now: DateTime<Utc>) -> EvidenceSnapshot {
        let mut by_symbol = HashMap::new();
        by_symbol.insert(
            "SOL".to_string(),
            SymbolEvidence {
                pf_7d: 1.08,
                pf_30d: 1.10,
                trades_30d: 50,
                policy_level: PolicyLevel::Full,
            },
        );
        EvidenceSnapshot {
            generated_at: now - Duration::minutes(10),
            age_seconds: 600,
            global: GlobalEvidence {
                pf_7d: 1.10,
                pf_30d: 1.10,
                trades_30d: 150,
                max_drawdown_pct: 0.05,
            },
            by_symbol,
        }
    }

    fn gate() -> ShadowGate {
        ShadowGate::new(
            ShadowConfig::default(),
            Arc::new(SetQuarantine(HashSet::new())),
        )
    }

    #[tokio::test]
    async fn test_healthy_evidence_auto_enables() {
        let now = t0();
        let snap = healthy_snapshot(now);
        let mut state = ShadowGateState::new();

        let d = gate()
            .evaluate(now, Some(CircuitMode::HaltNewEntries), Some(&snap), 0, &mut state)
            .await;

        assert!(d.enabled);
        assert_eq!(d.decision, GateDecisionKind::AutoEnabled);
        assert_eq!(state.last_enabled_at, Some(now));
    }

    #[tokio::test]
    async fn test_weak_pf7d_auto_disables_with_reason() {
        let now = t0();
        let mut snap = healthy_snapshot(now);
        snap.global.pf_7d = 1.00;
        let mut state = ShadowGateState::new();

        let d = gate()
            .evaluate(now, Some(CircuitMode::HaltNewEntries), Some(&snap), 0, &mut state)
            .await;

        assert!(!d.enabled);
        assert_eq!(d.decision, GateDecisionKind::AutoDisabled);
        assert!(d.reason.contains("pf7d"));
        assert_eq!(state.last_auto_disable_at, Some(now));
    }

    #[tokio::test]
    async fn test_wrong_capital_mode_disables() {
        let now = t0();
        let snap = healthy_snapshot(now);
        let mut state = ShadowGateState::new();

        let d = gate()
            .evaluate(now, Some(CircuitMode::Normal), Some(&snap), 0, &mut state)
            .await;

        assert_eq!(d.decision, GateDecisionKind::AutoDisabled);
        assert!(d.reason.contains("capital_mode"));
    }

    #[tokio::test]
    async fn test_stale_evidence_disables() {
        let now = t0();
        let mut snap = healthy_snapshot(now);
        snap.generated_at = now - Duration::minutes(91);
        let mut state = ShadowGateState::new();

        let d = gate()
            .evaluate(now, Some(CircuitMode::HaltNewEntries), Some(&snap), 0, &mut state)
            .await;

        assert_eq!(d.decision, GateDecisionKind::AutoDisabled);
        assert!(d.reason.contains("evidence_stale"));
    }

    #[tokio::test]
    async fn test_probe_losses_disable_and_then_cooldown_holds() {
        let now = t0();
        let snap = healthy_snapshot(now);
        let mut state = ShadowGateState::new();

        let d = gate()
            .evaluate(now, Some(CircuitMode::HaltNewEntries), Some(&snap), 2, &mut state)
            .await;
        assert_eq!(d.decision, GateDecisionKind::AutoDisabled);
        assert!(d.reason.contains("probe_losses_24h"));

        // Losses cleared, but the disable happened minutes ago: hold, not a
        // fresh disable
        let later = now + Duration::hours(2);
        let snap2 = healthy_snapshot(later);
        let d2 = gate()
            .evaluate(later, Some(CircuitMode::HaltNewEntries), Some(&snap2), 0, &mut state)
            .await;
        assert_eq!(d2.decision, GateDecisionKind::Hold);
        assert!(d2.reason.contains("auto_disable_cooldown"));

        // Past the 24h hold-down it can enable again
        let much_later = now + Duration::hours(25);
        let snap3 = healthy_snapshot(much_later);
        let d3 = gate()
            .evaluate(
                much_later,
                Some(CircuitMode::HaltNewEntries),
                Some(&snap3),
                0,
                &mut state,
            )
            .await;
        assert_eq!(d3.decision, GateDecisionKind::AutoEnabled);
    }

    #[tokio::test]
    async fn test_quarantined_only_symbol_holds() {
        let now = t0();
        let snap = healthy_snapshot(now);
        let mut state = ShadowGateState::new();

        let mut q = HashSet::new();
        q.insert("SOL".to_string());
        let gate = ShadowGate::new(ShadowConfig::default(), Arc::new(SetQuarantine(q)));

        let d = gate
            .evaluate(now, Some(CircuitMode::HaltNewEntries), Some(&snap), 0, &mut state)
            .await;
        assert_eq!(d.decision, GateDecisionKind::Hold);
        assert!(d.reason.contains("no_eligible_symbol"));
    }

    #[tokio::test]
    async fn test_first_failing_enable_condition_named() {
        let now = t0();
        let mut snap = healthy_snapshot(now);
        snap.global.trades_30d = 80;
        let mut state = ShadowGateState::new();

        let d = gate()
            .evaluate(now, Some(CircuitMode::HaltNewEntries), Some(&snap), 0, &mut state)
            .await;
        assert_eq!(d.decision, GateDecisionKind::Hold);
        assert!(d.reason.contains("trades30d"));
    }

    #[tokio::test]
    async fn test_missing_circuit_mode_fails_closed() {
        let now = t0();
        let snap = healthy_snapshot(now);
        let mut state = ShadowGateState::new();

        let d = gate().evaluate(now, None, Some(&snap), 0, &mut state).await;
        assert_eq!(d.decision, GateDecisionKind::AutoDisabled);
        assert!(d.reason.contains("internal_error"));
    }
}
