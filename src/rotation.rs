//! Rotation/Cooldown Engine
//!
//! Exit-condition evaluation for any open micro position, cooldown
//! enforcement, and fair entry selection across eligible symbols. Exit
//! evaluation always runs before entry logic and is never blocked by
//! entry-side gates.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RotationConfig;
use crate::cooldown::{CooldownKind, CooldownRegistry};
use crate::providers::{PriceFeed, QuarantineList, SignalProvider};
use crate::store::{StateDocument, ROTATION_ENGINE_KEY, ROTATION_ENGINE_SCHEMA_VERSION};
use crate::tradelog::TradeLog;
use crate::types::{CircuitMode, Direction, GateError, ProbePosition};

/// Capacity of the recent-opens ring; only `repeat_limit` entries are
/// consulted, the rest are operator context
const OPEN_RING_CAPACITY: usize = 8;

/// Why a position was closed. Declaration order is check order, and the
/// first condition to fire wins the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Timeout,
    SignalDecay,
    SignalReversal,
    Target,
    Stop,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Timeout => "timeout",
            ExitReason::SignalDecay => "signal_decay",
            ExitReason::SignalReversal => "signal_reversal",
            ExitReason::Target => "target",
            ExitReason::Stop => "stop",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the exit price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPxSource {
    Market,
    /// No price was available; the entry price stands in (zero PnL)
    EntryFallbackNoPrice,
}

impl ExitPxSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitPxSource::Market => "market",
            ExitPxSource::EntryFallbackNoPrice => "entry_fallback_no_price",
        }
    }
}

/// A fired exit condition
#[derive(Debug, Clone)]
pub struct ExitSignal {
    pub reason: ExitReason,
    pub exit_price: Decimal,
    pub px_source: ExitPxSource,
    pub detail: String,
}

/// One recorded open, for the anti-starvation rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenEvent {
    pub ts: DateTime<Utc>,
    pub symbol: String,
}

/// Fixed-capacity ring of recent opens with explicit eviction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRing {
    capacity: usize,
    slots: VecDeque<OpenEvent>,
}

impl Default for OpenRing {
    fn default() -> Self {
        Self::with_capacity(OPEN_RING_CAPACITY)
    }
}

impl OpenRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Record an open, evicting the oldest entry when full
    pub fn push(&mut self, ts: DateTime<Utc>, symbol: &str) {
        if self.slots.len() == self.capacity {
            self.slots.pop_front();
        }
        self.slots.push_back(OpenEvent {
            ts,
            symbol: symbol.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The symbol that took all of the last `k` opens, if any
    pub fn repeated_symbol(&self, k: usize) -> Option<&str> {
        if k == 0 || self.slots.len() < k {
            return None;
        }
        let mut recent = self.slots.iter().rev().take(k);
        let first = recent.next()?;
        if recent.all(|e| e.symbol == first.symbol) {
            Some(&first.symbol)
        } else {
            None
        }
    }
}

/// Persisted rotation-engine document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotationState {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub cooldowns: CooldownRegistry,
    #[serde(default)]
    pub last_opens: OpenRing,
    /// Set when this tick changed cooldowns or the ring; the runner uses it
    /// to decide whether the document needs rewriting
    #[serde(skip)]
    dirty: bool,
}

impl RotationState {
    pub fn new() -> Self {
        Self {
            schema_version: ROTATION_ENGINE_SCHEMA_VERSION,
            ..Default::default()
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

impl StateDocument for RotationState {
    const KEY: &'static str = ROTATION_ENGINE_KEY;
    const SCHEMA_VERSION: u32 = ROTATION_ENGINE_SCHEMA_VERSION;
}

/// A symbol offered for entry selection, in recommended order
#[derive(Debug, Clone)]
pub struct CandidateSymbol {
    pub symbol: String,
    /// Per-symbol confidence floor from the exploration policy, if any
    pub floor_override: Option<f64>,
}

/// The winning entry candidate
#[derive(Debug, Clone)]
pub struct EntryChoice {
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub regime: String,
}

struct PassingCandidate {
    symbol: String,
    direction: Direction,
    confidence: f64,
    regime: String,
    closes_24h: usize,
}

/// The engine itself; stateless apart from its collaborators, all durable
/// state lives in `RotationState` and the trade log
pub struct RotationEngine {
    config: RotationConfig,
    signals: Arc<dyn SignalProvider>,
    prices: Arc<dyn PriceFeed>,
    quarantine: Arc<dyn QuarantineList>,
}

impl RotationEngine {
    pub fn new(
        config: RotationConfig,
        signals: Arc<dyn SignalProvider>,
        prices: Arc<dyn PriceFeed>,
        quarantine: Arc<dyn QuarantineList>,
    ) -> Self {
        Self {
            config,
            signals,
            prices,
            quarantine,
        }
    }

    /// Evaluate exit conditions on an open position. At most one fires per
    /// tick; the check order is the tie-break. Provider failures degrade to
    /// "condition not evaluable", they never block the checks that need no
    /// external input.
    pub async fn evaluate_exit(
        &self,
        position: &ProbePosition,
        now: DateTime<Utc>,
        mode: CircuitMode,
        timeframe: &str,
    ) -> Option<ExitSignal> {
        let cfg = &self.config;

        let price = match self.prices.last_price(&position.symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "Price lookup failed for {} ({}): {}",
                    position.symbol,
                    e.classification(),
                    e
                );
                None
            }
        };
        let (exit_price, px_source) = match price {
            Some(p) => (p, ExitPxSource::Market),
            None => (position.entry_price, ExitPxSource::EntryFallbackNoPrice),
        };

        // 1. Timeout, clamped under the de-risk posture
        let max_hold = if mode == CircuitMode::Derisk {
            Duration::minutes(cfg.derisk_max_hold_minutes)
        } else {
            Duration::minutes(cfg.max_hold_minutes)
        };
        let age = now.signed_duration_since(position.entry_ts);
        if age >= max_hold {
            return Some(ExitSignal {
                reason: ExitReason::Timeout,
                exit_price,
                px_source,
                detail: format!(
                    "held {}m >= max {}m",
                    age.num_minutes(),
                    max_hold.num_minutes()
                ),
            });
        }

        // 2 & 3. Signal decay / reversal, when the provider answers
        match self.signals.get_signal(&position.symbol, timeframe).await {
            Ok(signal) => {
                if signal.confidence < cfg.decay_confidence_floor {
                    return Some(ExitSignal {
                        reason: ExitReason::SignalDecay,
                        exit_price,
                        px_source,
                        detail: format!(
                            "confidence {:.3} < floor {:.3}",
                            signal.confidence, cfg.decay_confidence_floor
                        ),
                    });
                }
                if signal.direction == position.direction.opposite()
                    && !signal.direction.is_flat()
                    && signal.confidence >= cfg.reversal_confidence_floor
                {
                    return Some(ExitSignal {
                        reason: ExitReason::SignalReversal,
                        exit_price,
                        px_source,
                        detail: format!(
                            "{} flipped to {} at {:.3}",
                            position.direction, signal.direction, signal.confidence
                        ),
                    });
                }
            }
            Err(e) => {
                warn!(
                    "Signal re-query failed for {} ({}): {}",
                    position.symbol,
                    e.classification(),
                    e
                );
            }
        }

        // 4. Target/stop require a real price
        if let Some(px) = price {
            if let Some(move_pct) = unrealized_move_pct(position, px) {
                if move_pct >= cfg.take_profit_pct {
                    return Some(ExitSignal {
                        reason: ExitReason::Target,
                        exit_price: px,
                        px_source: ExitPxSource::Market,
                        detail: format!("move {:.3}% >= target {:.3}%", move_pct, cfg.take_profit_pct),
                    });
                }
                if move_pct <= cfg.stop_loss_pct {
                    return Some(ExitSignal {
                        reason: ExitReason::Stop,
                        exit_price: px,
                        px_source: ExitPxSource::Market,
                        detail: format!("move {:.3}% <= stop {:.3}%", move_pct, cfg.stop_loss_pct),
                    });
                }
            }
        }

        None
    }

    /// Arm the after-close cooldown for a symbol. A target exit gets the
    /// longer target-hit cooldown; every other exit gets post-close.
    pub fn arm_post_exit_cooldown(
        &self,
        state: &mut RotationState,
        symbol: &str,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) {
        let cfg = &self.config;
        match reason {
            ExitReason::Target => state.cooldowns.set(
                symbol,
                CooldownKind::TargetHit,
                now + Duration::minutes(cfg.target_hit_cooldown_minutes),
            ),
            _ => state.cooldowns.set(
                symbol,
                CooldownKind::PostClose,
                now + Duration::minutes(cfg.post_close_cooldown_minutes),
            ),
        }
        state.mark_dirty();
    }

    /// Record an open in the rotation ring
    pub fn record_open(&self, state: &mut RotationState, symbol: &str, now: DateTime<Utc>) {
        state.last_opens.push(now, symbol);
        state.mark_dirty();
    }

    /// Remaining hold-off from the global inter-open rate limit, derived
    /// from the durable trade log so a restart cannot bypass it
    pub fn open_rate_limit_remaining(
        &self,
        log: &TradeLog,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let last = log.last_open_at()?;
        let min_interval = Duration::minutes(self.config.min_open_interval_minutes);
        let elapsed = now.signed_duration_since(last);
        if elapsed < min_interval {
            Some(min_interval - elapsed)
        } else {
            None
        }
    }

    /// Pick one symbol to open from the recommended-order candidates, or
    /// `None` when nothing passes. Mutates cooldowns (no-signal arming and
    /// lazy eviction) and nothing else.
    pub async fn select_entry(
        &self,
        candidates: &[CandidateSymbol],
        state: &mut RotationState,
        log: &TradeLog,
        now: DateTime<Utc>,
        timeframe: &str,
    ) -> Result<Option<EntryChoice>, GateError> {
        let cfg = &self.config;
        let mut passing: Vec<PassingCandidate> = Vec::new();

        for cand in candidates {
            let symbol = cand.symbol.as_str();

            match self.quarantine.is_quarantined(symbol).await {
                Ok(false) => {}
                Ok(true) => {
                    debug!("Entry skip {}: quarantined", symbol);
                    continue;
                }
                Err(e) => {
                    // Unknown quarantine status reads as quarantined
                    warn!("Quarantine lookup failed for {}: {}", symbol, e);
                    continue;
                }
            }

            if let Some(active) = state.cooldowns.is_active(symbol, now) {
                debug!(
                    "Entry skip {}: cooling down ({}, {}s left)",
                    symbol,
                    active.kind,
                    active.remaining.num_seconds()
                );
                continue;
            }

            let signal = match self.signals.get_signal(symbol, timeframe).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("Signal query failed for {}: {}", symbol, e);
                    self.arm_no_signal(state, symbol, now);
                    continue;
                }
            };

            let floor = cand
                .floor_override
                .unwrap_or_else(|| cfg.entry_floor(&signal.regime));
            if signal.direction.is_flat() || !signal.entry_ok || signal.confidence < floor {
                debug!(
                    "Entry skip {}: no actionable signal (dir={}, conf={:.3}, floor={:.3})",
                    symbol, signal.direction, signal.confidence, floor
                );
                self.arm_no_signal(state, symbol, now);
                continue;
            }

            passing.push(PassingCandidate {
                symbol: symbol.to_string(),
                direction: signal.direction,
                confidence: signal.confidence,
                regime: signal.regime,
                closes_24h: log.closes_since(symbol, now - Duration::hours(24)),
            });
        }

        if passing.is_empty() {
            return Ok(None);
        }

        // Anti-starvation rotation: a symbol that took the last k opens
        // steps aside for one tick, but only when an alternative exists
        if let Some(repeat) = state.last_opens.repeated_symbol(cfg.repeat_limit) {
            let repeat = repeat.to_string();
            if passing.iter().any(|c| c.symbol != repeat) {
                info!(
                    "Rotation: {} took the last {} opens, yielding this tick",
                    repeat, cfg.repeat_limit
                );
                passing.retain(|c| c.symbol != repeat);
            }
        }

        // Highest confidence wins; near-ties prefer the symbol with fewer
        // closes in the trailing 24h, then symbol order for reproducibility
        let best = passing
            .iter()
            .map(|c| c.confidence)
            .fold(f64::MIN, f64::max);
        let mut near: Vec<PassingCandidate> = passing
            .into_iter()
            .filter(|c| c.confidence >= best - cfg.confidence_tie_tolerance)
            .collect();
        near.sort_by(|a, b| {
            a.closes_24h
                .cmp(&b.closes_24h)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let chosen = near.into_iter().next().map(|c| EntryChoice {
            symbol: c.symbol,
            direction: c.direction,
            confidence: c.confidence,
            regime: c.regime,
        });
        Ok(chosen)
    }

    fn arm_no_signal(&self, state: &mut RotationState, symbol: &str, now: DateTime<Utc>) {
        state.cooldowns.set(
            symbol,
            CooldownKind::NoSignal,
            now + Duration::minutes(self.config.no_signal_cooldown_minutes),
        );
        state.mark_dirty();
    }
}

/// Signed unrealized move of a position at `price`, in percent
fn unrealized_move_pct(position: &ProbePosition, price: Decimal) -> Option<f64> {
    if position.entry_price.is_zero() {
        return None;
    }
    let frac = (price - position.entry_price) / position.entry_price;
    let signed = frac * Decimal::from(position.direction.sign());
    signed.to_f64().map(|f| f * 100.0)
}
