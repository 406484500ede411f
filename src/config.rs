//! Gate pipeline configuration
//!
//! Thresholds and durations for the four components. Defaults match the
//! production posture; a YAML file and `GATE_`-prefixed environment variables
//! can override individual knobs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::CircuitMode;

/// Top-level configuration for the gate pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GateConfig {
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
}

impl GateConfig {
    /// Load configuration in layers: defaults, then an optional YAML file,
    /// then `GATE_`-prefixed environment variables (`GATE_PROBE__EQUITY_USD`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(p) = path {
            builder = builder.add_source(config::File::from(p));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GATE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build()?;
        let loaded: GateConfig = cfg.try_deserialize()?;
        Ok(loaded)
    }
}

/// Shadow Gate thresholds for aggregate evidence gating
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowConfig {
    /// Evidence older than this is treated as absent
    #[serde(default = "default_evidence_max_age_minutes")]
    pub evidence_max_age_minutes: i64,
    /// Hard disable floor on global 7-day profit factor
    #[serde(default = "default_pf7d_disable_floor")]
    pub pf7d_disable_floor: f64,
    /// Enable floor on global 7-day profit factor
    #[serde(default = "default_pf7d_enable_floor")]
    pub pf7d_enable_floor: f64,
    /// Enable floor on global 30-day profit factor
    #[serde(default = "default_pf30d_enable_floor")]
    pub pf30d_enable_floor: f64,
    /// Minimum 30-day trade count for the evidence to mean anything
    #[serde(default = "default_trades30d_min")]
    pub trades30d_min: u32,
    /// Maximum tolerated global drawdown, as a fraction
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
    /// Per-symbol enable floors: at least one symbol must clear both
    #[serde(default = "default_symbol_pf30d_min")]
    pub symbol_pf30d_min: f64,
    #[serde(default = "default_symbol_trades30d_min")]
    pub symbol_trades30d_min: u32,
    /// Probe losses in the rolling 24h that force a disable
    #[serde(default = "default_max_probe_losses_24h")]
    pub max_probe_losses_24h: usize,
    /// Hold-down after an auto-disable before re-enable is considered
    #[serde(default = "default_disable_cooldown_hours")]
    pub disable_cooldown_hours: i64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            evidence_max_age_minutes: default_evidence_max_age_minutes(),
            pf7d_disable_floor: default_pf7d_disable_floor(),
            pf7d_enable_floor: default_pf7d_enable_floor(),
            pf30d_enable_floor: default_pf30d_enable_floor(),
            trades30d_min: default_trades30d_min(),
            max_drawdown: default_max_drawdown(),
            symbol_pf30d_min: default_symbol_pf30d_min(),
            symbol_trades30d_min: default_symbol_trades30d_min(),
            max_probe_losses_24h: default_max_probe_losses_24h(),
            disable_cooldown_hours: default_disable_cooldown_hours(),
        }
    }
}

fn default_evidence_max_age_minutes() -> i64 { 90 }
fn default_pf7d_disable_floor() -> f64 { 1.02 }
fn default_pf7d_enable_floor() -> f64 { 1.05 }
fn default_pf30d_enable_floor() -> f64 { 1.05 }
fn default_trades30d_min() -> u32 { 100 }
fn default_max_drawdown() -> f64 { 0.10 }
fn default_symbol_pf30d_min() -> f64 { 1.05 }
fn default_symbol_trades30d_min() -> u32 { 30 }
fn default_max_probe_losses_24h() -> usize { 2 }
fn default_disable_cooldown_hours() -> i64 { 24 }

/// Probe Executor knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Circuit-breaker modes in which the probe lane may open positions
    #[serde(default = "default_allowed_modes")]
    pub allowed_modes: Vec<CircuitMode>,
    /// Signal timeframe the probe lane trades on
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Equity base used for sizing and drawdown percentages
    #[serde(default = "default_equity_usd")]
    pub equity_usd: u64,
    /// Per-symbol eligibility floors
    #[serde(default = "default_symbol_trades30d_min")]
    pub symbol_trades30d_min: u32,
    #[serde(default = "default_symbol_pf30d_min")]
    pub symbol_pf30d_min: f64,
    #[serde(default = "default_symbol_pf7d_min")]
    pub symbol_pf7d_min: f64,
    /// Dust floor: sized notionals below this block instead of opening
    #[serde(default = "default_min_notional_usd")]
    pub min_notional_usd: u64,
    /// Hold-down after a losing probe close
    #[serde(default = "default_loss_cooldown_hours")]
    pub loss_cooldown_hours: i64,
    /// Losses in the rolling 24h that freeze the lane
    #[serde(default = "default_max_probe_losses_24h")]
    pub max_losses_24h: usize,
    /// Exploration policy file; entries may bar symbols from probing
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
    /// Whether a missing policy file permits probing (paper-mode leniency,
    /// auditable here rather than implied by the trading mode)
    #[serde(default)]
    pub allow_on_missing_policy: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            allowed_modes: default_allowed_modes(),
            timeframe: default_timeframe(),
            equity_usd: default_equity_usd(),
            symbol_trades30d_min: default_symbol_trades30d_min(),
            symbol_pf30d_min: default_symbol_pf30d_min(),
            symbol_pf7d_min: default_symbol_pf7d_min(),
            min_notional_usd: default_min_notional_usd(),
            loss_cooldown_hours: default_loss_cooldown_hours(),
            max_losses_24h: default_max_probe_losses_24h(),
            policy_path: None,
            allow_on_missing_policy: false,
        }
    }
}

fn default_allowed_modes() -> Vec<CircuitMode> {
    vec![CircuitMode::HaltNewEntries]
}
fn default_timeframe() -> String { "15m".to_string() }
fn default_equity_usd() -> u64 { 10_000 }
fn default_symbol_pf7d_min() -> f64 { 1.03 }
fn default_min_notional_usd() -> u64 { 10 }
fn default_loss_cooldown_hours() -> i64 { 4 }

/// Rotation/Cooldown Engine knobs: exits, cooldowns, selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Maximum position hold before the timeout exit fires
    #[serde(default = "default_max_hold_minutes")]
    pub max_hold_minutes: i64,
    /// Clamped hold under the de-risk circuit mode
    #[serde(default = "default_derisk_max_hold_minutes")]
    pub derisk_max_hold_minutes: i64,
    /// Exit when signal confidence falls below this
    #[serde(default = "default_decay_floor")]
    pub decay_confidence_floor: f64,
    /// Exit when the opposite direction reports at least this confidence
    #[serde(default = "default_reversal_floor")]
    pub reversal_confidence_floor: f64,
    /// Take-profit threshold on unrealized move, percent
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    /// Stop-loss threshold on unrealized move, percent (negative)
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Entry confidence floor when the regime has no override
    #[serde(default = "default_entry_floor")]
    pub entry_confidence_floor: f64,
    /// Per-regime entry floor overrides
    #[serde(default)]
    pub regime_confidence_floors: HashMap<String, f64>,
    #[serde(default = "default_no_signal_cooldown_minutes")]
    pub no_signal_cooldown_minutes: i64,
    #[serde(default = "default_post_close_cooldown_minutes")]
    pub post_close_cooldown_minutes: i64,
    #[serde(default = "default_target_hit_cooldown_minutes")]
    pub target_hit_cooldown_minutes: i64,
    /// Minimum interval between any two opens, regardless of symbol
    #[serde(default = "default_min_open_interval_minutes")]
    pub min_open_interval_minutes: i64,
    /// Consecutive same-symbol opens that trigger the rotation rule
    #[serde(default = "default_repeat_limit")]
    pub repeat_limit: usize,
    /// Candidates within this much of the best confidence tie on diversity
    #[serde(default = "default_tie_tolerance")]
    pub confidence_tie_tolerance: f64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_hold_minutes: default_max_hold_minutes(),
            derisk_max_hold_minutes: default_derisk_max_hold_minutes(),
            decay_confidence_floor: default_decay_floor(),
            reversal_confidence_floor: default_reversal_floor(),
            take_profit_pct: default_take_profit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            entry_confidence_floor: default_entry_floor(),
            regime_confidence_floors: HashMap::new(),
            no_signal_cooldown_minutes: default_no_signal_cooldown_minutes(),
            post_close_cooldown_minutes: default_post_close_cooldown_minutes(),
            target_hit_cooldown_minutes: default_target_hit_cooldown_minutes(),
            min_open_interval_minutes: default_min_open_interval_minutes(),
            repeat_limit: default_repeat_limit(),
            confidence_tie_tolerance: default_tie_tolerance(),
        }
    }
}

impl RotationConfig {
    /// Entry confidence floor for a regime, falling back to the base floor
    pub fn entry_floor(&self, regime: &str) -> f64 {
        self.regime_confidence_floors
            .get(regime)
            .copied()
            .unwrap_or(self.entry_confidence_floor)
    }
}

fn default_max_hold_minutes() -> i64 { 45 }
fn default_derisk_max_hold_minutes() -> i64 { 15 }
fn default_decay_floor() -> f64 { 0.42 }
fn default_reversal_floor() -> f64 { 0.55 }
fn default_take_profit_pct() -> f64 { 0.75 }
fn default_stop_loss_pct() -> f64 { -0.50 }
fn default_entry_floor() -> f64 { 0.55 }
fn default_no_signal_cooldown_minutes() -> i64 { 5 }
fn default_post_close_cooldown_minutes() -> i64 { 10 }
fn default_target_hit_cooldown_minutes() -> i64 { 15 }
fn default_min_open_interval_minutes() -> i64 { 12 }
fn default_repeat_limit() -> usize { 2 }
fn default_tie_tolerance() -> f64 { 0.05 }

/// Promotion Gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Trailing window the live probe metrics are computed over
    #[serde(default = "default_live_window_days")]
    pub live_window_days: i64,
    /// Demotion triggers (only checked from the exploit-enabled mode)
    #[serde(default = "default_demote_min_trades")]
    pub demote_min_trades: u32,
    #[serde(default = "default_demote_pf_below")]
    pub demote_pf_below: f64,
    #[serde(default = "default_demote_consecutive_losses")]
    pub demote_consecutive_losses: u32,
    /// Live drawdown demotion trigger, percent of equity
    #[serde(default = "default_demote_max_drawdown_pct")]
    pub demote_max_drawdown_pct: f64,
    #[serde(default = "default_demote_shadow_pf7d_below")]
    pub demote_shadow_pf7d_below: f64,
    /// Promotion requirements (all must hold)
    #[serde(default = "default_promote_min_trades")]
    pub promote_min_trades: u32,
    #[serde(default = "default_promote_pf_min")]
    pub promote_pf_min: f64,
    /// Live drawdown promotion ceiling, percent of equity
    #[serde(default = "default_promote_max_drawdown_pct")]
    pub promote_max_drawdown_pct: f64,
    #[serde(default = "default_promote_max_consecutive_losses")]
    pub promote_max_consecutive_losses: u32,
    #[serde(default = "default_promote_shadow_pf7d_min")]
    pub promote_shadow_pf7d_min: f64,
    /// Per-symbol floors applied to the active probe subject
    #[serde(default = "default_symbol_trades30d_min")]
    pub subject_trades30d_min: u32,
    #[serde(default = "default_symbol_pf30d_min")]
    pub subject_pf30d_min: f64,
    /// Window after the gate was last enabled in which promotion may still run
    #[serde(default = "default_grace_hours")]
    pub grace_hours: i64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            live_window_days: default_live_window_days(),
            demote_min_trades: default_demote_min_trades(),
            demote_pf_below: default_demote_pf_below(),
            demote_consecutive_losses: default_demote_consecutive_losses(),
            demote_max_drawdown_pct: default_demote_max_drawdown_pct(),
            demote_shadow_pf7d_below: default_demote_shadow_pf7d_below(),
            promote_min_trades: default_promote_min_trades(),
            promote_pf_min: default_promote_pf_min(),
            promote_max_drawdown_pct: default_promote_max_drawdown_pct(),
            promote_max_consecutive_losses: default_promote_max_consecutive_losses(),
            promote_shadow_pf7d_min: default_promote_shadow_pf7d_min(),
            subject_trades30d_min: default_symbol_trades30d_min(),
            subject_pf30d_min: default_symbol_pf30d_min(),
            grace_hours: default_grace_hours(),
        }
    }
}

fn default_live_window_days() -> i64 { 7 }
fn default_demote_min_trades() -> u32 { 6 }
fn default_demote_pf_below() -> f64 { 1.00 }
fn default_demote_consecutive_losses() -> u32 { 3 }
fn default_demote_max_drawdown_pct() -> f64 { 0.20 }
fn default_demote_shadow_pf7d_below() -> f64 { 1.02 }
fn default_promote_min_trades() -> u32 { 12 }
fn default_promote_pf_min() -> f64 { 1.05 }
fn default_promote_max_drawdown_pct() -> f64 { 0.15 }
fn default_promote_max_consecutive_losses() -> u32 { 2 }
fn default_promote_shadow_pf7d_min() -> f64 { 1.05 }
fn default_grace_hours() -> i64 { 6 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_posture() {
        let cfg = GateConfig::default();
        assert_eq!(cfg.shadow.evidence_max_age_minutes, 90);
        assert_eq!(cfg.shadow.pf7d_disable_floor, 1.02);
        assert_eq!(cfg.rotation.max_hold_minutes, 45);
        assert_eq!(cfg.rotation.min_open_interval_minutes, 12);
        assert_eq!(cfg.promotion.promote_min_trades, 12);
        assert_eq!(cfg.probe.allowed_modes, vec![CircuitMode::HaltNewEntries]);
        assert!(!cfg.probe.allow_on_missing_policy);
    }

    #[test]
    fn test_regime_floor_fallback() {
        let mut cfg = RotationConfig::default();
        cfg.regime_confidence_floors.insert("chop".to_string(), 0.62);
        assert_eq!(cfg.entry_floor("chop"), 0.62);
        assert_eq!(cfg.entry_floor("trend"), cfg.entry_confidence_floor);
    }
}
