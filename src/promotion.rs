//! Promotion Gate
//!
//! Three-state machine deciding whether the higher-risk exploit executor may
//! act: disabled, probe-only, or exploit-enabled. Transitions are evaluated
//! against the previously persisted mode, so demotion hysteresis only applies
//! once exposure was actually granted. Any failure to assemble the inputs
//! fails closed to disabled.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PromotionConfig;
use crate::store::{StateDocument, PROMOTION_GATE_KEY, PROMOTION_GATE_SCHEMA_VERSION};
use crate::tradelog::LiveProbeMetrics;

/// Operating mode granted to downstream executors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionMode {
    Disabled,
    ProbeOnly,
    ExploitEnabled,
}

impl std::fmt::Display for PromotionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromotionMode::Disabled => write!(f, "DISABLED"),
            PromotionMode::ProbeOnly => write!(f, "PROBE_ONLY"),
            PromotionMode::ExploitEnabled => write!(f, "EXPLOIT_ENABLED"),
        }
    }
}

/// What this evaluation did to the mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionDecision {
    Promote,
    Demote,
    Hold,
}

/// Shadow-side evidence consumed by the gate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowMetrics {
    pub pf_7d: f64,
    pub pf_30d: f64,
    pub trades: u32,
}

/// Evidence for the symbol currently being probed
#[derive(Debug, Clone)]
pub struct SubjectEvidence {
    pub symbol: String,
    pub trades_30d: u32,
    pub pf_30d: f64,
}

/// Everything one evaluation needs; assembled by the runner
#[derive(Debug, Clone)]
pub struct PromotionInputs {
    pub live: LiveProbeMetrics,
    pub shadow: ShadowMetrics,
    /// Whether the shadow gate is enabled this tick
    pub gate_enabled: bool,
    /// When the shadow gate last reported enabled, for the grace window
    pub gate_last_enabled_at: Option<DateTime<Utc>>,
    /// The active probe subject, when one exists
    pub subject: Option<SubjectEvidence>,
}

/// Persisted promotion-gate document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionState {
    #[serde(default)]
    pub schema_version: u32,
    pub mode: PromotionMode,
    pub decision: PromotionDecision,
    pub reason: String,
    pub live: LiveProbeMetrics,
    pub shadow: ShadowMetrics,
    pub evaluated_at: DateTime<Utc>,
}

impl PromotionState {
    /// The state before anything was ever evaluated
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            schema_version: PROMOTION_GATE_SCHEMA_VERSION,
            mode: PromotionMode::Disabled,
            decision: PromotionDecision::Hold,
            reason: "never_evaluated".to_string(),
            live: LiveProbeMetrics::empty(),
            shadow: ShadowMetrics::default(),
            evaluated_at: now,
        }
    }

    /// Fail-closed state for a tick whose inputs could not be loaded
    pub fn evaluation_error(now: DateTime<Utc>, detail: &str) -> Self {
        warn!("Promotion gate failing closed: {}", detail);
        Self {
            schema_version: PROMOTION_GATE_SCHEMA_VERSION,
            mode: PromotionMode::Disabled,
            decision: PromotionDecision::Hold,
            reason: format!("evaluation_error: {}", detail),
            live: LiveProbeMetrics::empty(),
            shadow: ShadowMetrics::default(),
            evaluated_at: now,
        }
    }
}

impl StateDocument for PromotionState {
    const KEY: &'static str = PROMOTION_GATE_KEY;
    const SCHEMA_VERSION: u32 = PROMOTION_GATE_SCHEMA_VERSION;
}

/// The gate. Evaluation is a pure function of (now, previous mode, inputs),
/// so re-evaluating with unchanged inputs yields an identical document.
pub struct PromotionGate {
    config: PromotionConfig,
}

impl PromotionGate {
    pub fn new(config: PromotionConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        prev_mode: PromotionMode,
        inputs: &PromotionInputs,
    ) -> PromotionState {
        let cfg = &self.config;
        let live = &inputs.live;

        // Demotion first, and only from granted exposure
        if prev_mode == PromotionMode::ExploitEnabled {
            if let Some(reason) = self.demotion_reason(inputs) {
                info!("Promotion gate demoting: {}", reason);
                return self.state(
                    now,
                    PromotionMode::ProbeOnly,
                    PromotionDecision::Demote,
                    reason,
                    inputs,
                );
            }
        }

        // Promotion only while the shadow gate backs the probe lane, or did
        // within the grace window
        let in_grace = inputs
            .gate_last_enabled_at
            .map(|t| now.signed_duration_since(t) <= Duration::hours(cfg.grace_hours))
            .unwrap_or(false);
        if !inputs.gate_enabled && !in_grace {
            return self.state(
                now,
                PromotionMode::Disabled,
                PromotionDecision::Hold,
                "gate_disabled_beyond_grace".to_string(),
                inputs,
            );
        }

        // Exploit exposure persists until a demotion trigger fires
        if prev_mode == PromotionMode::ExploitEnabled {
            return self.state(
                now,
                PromotionMode::ExploitEnabled,
                PromotionDecision::Hold,
                "exploit_criteria_holding".to_string(),
                inputs,
            );
        }

        if let Some(reason) = self.promotion_gap(inputs) {
            return self.state(
                now,
                PromotionMode::ProbeOnly,
                PromotionDecision::Hold,
                reason,
                inputs,
            );
        }

        info!(
            "Promotion gate promoting to EXPLOIT_ENABLED: live trades={} pf={:.3}",
            live.trades, live.pf
        );
        self.state(
            now,
            PromotionMode::ExploitEnabled,
            PromotionDecision::Promote,
            "all_promotion_conditions_met".to_string(),
            inputs,
        )
    }

    /// First demotion trigger that fires, with its specific reason
    fn demotion_reason(&self, inputs: &PromotionInputs) -> Option<String> {
        let cfg = &self.config;
        let live = &inputs.live;

        if live.trades >= cfg.demote_min_trades && live.pf < cfg.demote_pf_below {
            return Some(format!(
                "live_pf_below_floor: pf={:.3} < {:.3} over {} trades",
                live.pf, cfg.demote_pf_below, live.trades
            ));
        }
        if live.consecutive_losses >= cfg.demote_consecutive_losses {
            return Some(format!(
                "consecutive_losses: {} >= {}",
                live.consecutive_losses, cfg.demote_consecutive_losses
            ));
        }
        if live.max_drawdown_pct > cfg.demote_max_drawdown_pct {
            return Some(format!(
                "live_drawdown_exceeded: {:.3}% > {:.3}%",
                live.max_drawdown_pct, cfg.demote_max_drawdown_pct
            ));
        }
        if inputs.shadow.pf_7d < cfg.demote_shadow_pf7d_below {
            return Some(format!(
                "shadow_pf7d_below_floor: {:.3} < {:.3}",
                inputs.shadow.pf_7d, cfg.demote_shadow_pf7d_below
            ));
        }
        None
    }

    /// First unmet promotion requirement, or `None` when all hold
    fn promotion_gap(&self, inputs: &PromotionInputs) -> Option<String> {
        let cfg = &self.config;
        let live = &inputs.live;

        if live.trades < cfg.promote_min_trades {
            return Some(format!(
                "live_trades_insufficient: {} < {}",
                live.trades, cfg.promote_min_trades
            ));
        }
        if live.pf < cfg.promote_pf_min {
            return Some(format!(
                "live_pf_insufficient: {:.3} < {:.3}",
                live.pf, cfg.promote_pf_min
            ));
        }
        if live.max_drawdown_pct > cfg.promote_max_drawdown_pct {
            return Some(format!(
                "live_drawdown_too_high: {:.3}% > {:.3}%",
                live.max_drawdown_pct, cfg.promote_max_drawdown_pct
            ));
        }
        if live.consecutive_losses > cfg.promote_max_consecutive_losses {
            return Some(format!(
                "consecutive_losses_too_high: {} > {}",
                live.consecutive_losses, cfg.promote_max_consecutive_losses
            ));
        }
        if inputs.shadow.pf_7d < cfg.promote_shadow_pf7d_min {
            return Some(format!(
                "shadow_pf7d_insufficient: {:.3} < {:.3}",
                inputs.shadow.pf_7d, cfg.promote_shadow_pf7d_min
            ));
        }
        if let Some(subject) = &inputs.subject {
            if subject.trades_30d < cfg.subject_trades30d_min {
                return Some(format!(
                    "subject_trades30d_insufficient: {} has {} < {}",
                    subject.symbol, subject.trades_30d, cfg.subject_trades30d_min
                ));
            }
            if subject.pf_30d < cfg.subject_pf30d_min {
                return Some(format!(
                    "subject_pf30d_insufficient: {} at {:.3} < {:.3}",
                    subject.symbol, subject.pf_30d, cfg.subject_pf30d_min
                ));
            }
        }
        None
    }

    fn state(
        &self,
        now: DateTime<Utc>,
        mode: PromotionMode,
        decision: PromotionDecision,
        reason: String,
        inputs: &PromotionInputs,
    ) -> PromotionState {
        PromotionState {
            schema_version: PROMOTION_GATE_SCHEMA_VERSION,
            mode,
            decision,
            reason,
            live: inputs.live.clone(),
            shadow: inputs.shadow.clone(),
            evaluated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    fn healthy_inputs(now: DateTime<Utc>) -> PromotionInputs {
        PromotionInputs {
            live: LiveProbeMetrics {
                trades: 14,
                pf: 1.20,
                win_rate: 0.64,
                max_drawdown_pct: 0.05,
                consecutive_losses: 1,
            },
            shadow: ShadowMetrics {
                pf_7d: 1.10,
                pf_30d: 1.12,
                trades: 150,
            },
            gate_enabled: true,
            gate_last_enabled_at: Some(now),
            subject: Some(SubjectEvidence {
                symbol: "SOL".to_string(),
                trades_30d: 50,
                pf_30d: 1.10,
            }),
        }
    }

    fn gate() -> PromotionGate {
        PromotionGate::new(PromotionConfig::default())
    }

    #[test]
    fn test_promotes_when_all_conditions_hold() {
        let now = t0();
        let s = gate().evaluate(now, PromotionMode::ProbeOnly, &healthy_inputs(now));
        assert_eq!(s.mode, PromotionMode::ExploitEnabled);
        assert_eq!(s.decision, PromotionDecision::Promote);
    }

    #[test]
    fn test_demotes_on_weak_live_pf() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.live.trades = 10;
        inputs.live.pf = 0.90;

        let s = gate().evaluate(now, PromotionMode::ExploitEnabled, &inputs);
        assert_eq!(s.mode, PromotionMode::ProbeOnly);
        assert_eq!(s.decision, PromotionDecision::Demote);
        assert!(s.reason.contains("live_pf_below_floor"));
    }

    #[test]
    fn test_demotion_requires_exploit_mode() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.live.trades = 10;
        inputs.live.pf = 0.90;

        // Same bad metrics from PROBE_ONLY: no demotion, just no promotion
        let s = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        assert_eq!(s.mode, PromotionMode::ProbeOnly);
        assert_eq!(s.decision, PromotionDecision::Hold);
    }

    #[test]
    fn test_demotes_on_consecutive_losses() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.live.consecutive_losses = 3;

        let s = gate().evaluate(now, PromotionMode::ExploitEnabled, &inputs);
        assert_eq!(s.decision, PromotionDecision::Demote);
        assert!(s.reason.contains("consecutive_losses"));
    }

    #[test]
    fn test_demotes_on_shadow_pf7d() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.shadow.pf_7d = 1.00;

        let s = gate().evaluate(now, PromotionMode::ExploitEnabled, &inputs);
        assert_eq!(s.decision, PromotionDecision::Demote);
        assert!(s.reason.contains("shadow_pf7d"));
    }

    #[test]
    fn test_exploit_holds_between_thresholds() {
        // PF between the demote floor (1.00) and promote floor (1.05):
        // hysteresis keeps exploit exposure
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.live.pf = 1.02;

        let s = gate().evaluate(now, PromotionMode::ExploitEnabled, &inputs);
        assert_eq!(s.mode, PromotionMode::ExploitEnabled);
        assert_eq!(s.decision, PromotionDecision::Hold);

        // But the same PF never earns a fresh promotion
        let s = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        assert_eq!(s.mode, PromotionMode::ProbeOnly);
    }

    #[test]
    fn test_gate_disabled_within_grace_still_promotes() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.gate_enabled = false;
        inputs.gate_last_enabled_at = Some(now - Duration::hours(5));

        let s = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        assert_eq!(s.mode, PromotionMode::ExploitEnabled);
    }

    #[test]
    fn test_gate_disabled_beyond_grace_disables() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.gate_enabled = false;
        inputs.gate_last_enabled_at = Some(now - Duration::hours(7));

        let s = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        assert_eq!(s.mode, PromotionMode::Disabled);
        assert!(s.reason.contains("gate_disabled"));
    }

    #[test]
    fn test_subject_floors_block_promotion() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.subject = Some(SubjectEvidence {
            symbol: "SOL".to_string(),
            trades_30d: 20,
            pf_30d: 1.10,
        });

        let s = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        assert_eq!(s.mode, PromotionMode::ProbeOnly);
        assert!(s.reason.contains("subject_trades30d"));
    }

    #[test]
    fn test_no_subject_skips_subject_check() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.subject = None;

        let s = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        assert_eq!(s.mode, PromotionMode::ExploitEnabled);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let now = t0();
        let inputs = healthy_inputs(now);
        let first = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        let second = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        assert_eq!(first, second);
    }

    #[test]
    fn test_infinite_pf_promotes() {
        let now = t0();
        let mut inputs = healthy_inputs(now);
        inputs.live.pf = f64::INFINITY;

        let s = gate().evaluate(now, PromotionMode::ProbeOnly, &inputs);
        assert_eq!(s.mode, PromotionMode::ExploitEnabled);
    }
}
