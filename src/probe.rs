//! Probe Executor
//!
//! Opens at most one bounded micro position per run when the shadow gate
//! allows, and manages its lifecycle through the rotation engine. Entry
//! preconditions are checked in order, first failure wins; exits are
//! evaluated before any of them and are never blocked by entry-side gates.
//! State writes are the last step of a successful path.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::ProbeConfig;
use crate::evidence::EvidenceSnapshot;
use crate::policy::ExplorationPolicy;
use crate::providers::{OrderGateway, PositionSizer, PriceFeed, SizeRequest};
use crate::rotation::{CandidateSymbol, RotationEngine, RotationState};
use crate::shadow::GateDecision;
use crate::store::{StateDocument, PROBE_EXECUTOR_KEY, PROBE_EXECUTOR_SCHEMA_VERSION};
use crate::tradelog::TradeLog;
use crate::types::{CircuitMode, GateError, ProbePosition, ProbeTickResult};

/// Probe notional as a fraction of what the sizer would allow at full
/// exposure. Hard-coded: the micro-cap is the point of the probe lane.
const PROBE_MICRO_FRACTION_BPS: u32 = 200;

/// Sizing tier the probe lane reports to the sizer
const PROBE_TIER: u8 = 1;

/// Persisted probe-executor document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeState {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub last_trade_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_symbol: Option<String>,
    /// Timestamps of losing closes, pruned to the rolling 24h
    #[serde(default)]
    pub losses_24h: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub open_position: Option<ProbePosition>,
}

impl ProbeState {
    pub fn new() -> Self {
        Self {
            schema_version: PROBE_EXECUTOR_SCHEMA_VERSION,
            ..Default::default()
        }
    }

    /// Drop loss markers older than 24h
    pub fn prune_losses(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(24);
        self.losses_24h.retain(|ts| *ts >= cutoff);
    }

    /// Losses inside the rolling 24h window, without mutating state
    pub fn losses_in_24h(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(24);
        self.losses_24h.iter().filter(|ts| **ts >= cutoff).count()
    }

    pub fn last_loss_at(&self) -> Option<DateTime<Utc>> {
        self.losses_24h.iter().max().copied()
    }
}

impl StateDocument for ProbeState {
    const KEY: &'static str = PROBE_EXECUTOR_KEY;
    const SCHEMA_VERSION: u32 = PROBE_EXECUTOR_SCHEMA_VERSION;
}

/// The executor
pub struct ProbeExecutor {
    config: ProbeConfig,
    rotation: RotationEngine,
    gateway: Arc<dyn OrderGateway>,
    sizer: Arc<dyn PositionSizer>,
    prices: Arc<dyn PriceFeed>,
    policy: ExplorationPolicy,
}

impl ProbeExecutor {
    pub fn new(
        config: ProbeConfig,
        rotation: RotationEngine,
        gateway: Arc<dyn OrderGateway>,
        sizer: Arc<dyn PositionSizer>,
        prices: Arc<dyn PriceFeed>,
        policy: ExplorationPolicy,
    ) -> Self {
        Self {
            config,
            rotation,
            gateway,
            sizer,
            prices,
            policy,
        }
    }

    /// One probe tick. Internal failures never propagate and never leave
    /// state partially mutated; they surface as `action=error`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_tick(
        &self,
        now: DateTime<Utc>,
        gate: &GateDecision,
        mode: CircuitMode,
        snapshot: Option<&EvidenceSnapshot>,
        state: &mut ProbeState,
        rotation_state: &mut RotationState,
        log: &mut TradeLog,
    ) -> ProbeTickResult {
        match self
            .run_tick_inner(now, gate, mode, snapshot, state, rotation_state, log)
            .await
        {
            Ok(result) => {
                info!(
                    "Probe tick: action={} reason={} symbol={:?}",
                    result.action, result.reason, result.symbol
                );
                result
            }
            Err(e) => {
                error!(
                    "Probe tick failed ({}): {} | gate={} mode={} position={:?}",
                    e.classification(),
                    e,
                    gate.decision,
                    mode,
                    state.open_position.as_ref().map(|p| p.symbol.as_str())
                );
                ProbeTickResult::error(format!("{}: {}", e.classification(), e))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_tick_inner(
        &self,
        now: DateTime<Utc>,
        gate: &GateDecision,
        mode: CircuitMode,
        snapshot: Option<&EvidenceSnapshot>,
        state: &mut ProbeState,
        rotation_state: &mut RotationState,
        log: &mut TradeLog,
    ) -> Result<ProbeTickResult, GateError> {
        // Exits run before every entry-side gate
        if let Some(position) = state.open_position.clone() {
            if let Some(exit) = self
                .rotation
                .evaluate_exit(&position, now, mode, &self.config.timeframe)
                .await
            {
                return self
                    .close_position(&position, exit, now, state, rotation_state, log)
                    .await;
            }
        }

        if !gate.enabled {
            return Ok(ProbeTickResult::disabled(format!(
                "gate_not_enabled: {}",
                gate.reason
            )));
        }

        if !self.config.allowed_modes.contains(&mode) {
            return Ok(ProbeTickResult::blocked(format!(
                "capital_mode_not_allowed: {}",
                mode
            )));
        }

        // Trade-frequency gates
        if let Some(last) = state.last_trade_at {
            if last.date_naive() == now.date_naive() {
                return Ok(ProbeTickResult::blocked("already_traded_today_utc"));
            }
        }
        if let Some(last_loss) = state.last_loss_at() {
            let hold = Duration::hours(self.config.loss_cooldown_hours);
            if now.signed_duration_since(last_loss) < hold {
                return Ok(ProbeTickResult::blocked(format!(
                    "loss_cooldown_active: last_loss_at={}",
                    last_loss.to_rfc3339()
                )));
            }
        }
        let losses = state.losses_in_24h(now);
        if losses >= self.config.max_losses_24h {
            return Ok(ProbeTickResult::blocked(format!(
                "max_losses_24h: {} >= {}",
                losses, self.config.max_losses_24h
            )));
        }

        if state.open_position.is_some() {
            return Ok(ProbeTickResult::blocked("open_position_exists"));
        }

        if let Some(remaining) = self.rotation.open_rate_limit_remaining(log, now) {
            return Ok(ProbeTickResult::blocked(format!(
                "open_rate_limited: {}s_remaining",
                remaining.num_seconds()
            )));
        }

        let snapshot = snapshot.ok_or_else(|| {
            GateError::InputUnavailable("evidence_snapshot_missing".to_string())
        })?;

        let candidates = self.eligible_candidates(snapshot);
        if candidates.is_empty() {
            return Ok(ProbeTickResult::blocked("no_eligible_symbol"));
        }

        let choice = match self
            .rotation
            .select_entry(&candidates, rotation_state, log, now, &self.config.timeframe)
            .await?
        {
            Some(c) => c,
            None => return Ok(ProbeTickResult::blocked("no_valid_candidate")),
        };

        // Size through the external sizer, then apply the micro-cap
        let policy_level = snapshot
            .symbol(&choice.symbol)
            .map(|ev| ev.policy_level)
            .ok_or_else(|| {
                GateError::Internal(format!("chosen symbol {} missing from evidence", choice.symbol))
            })?;
        let sized = self
            .sizer
            .size_notional(&SizeRequest {
                symbol: choice.symbol.clone(),
                equity_usd: Decimal::from(self.config.equity_usd),
                confidence: choice.confidence,
                policy_level,
                tier: PROBE_TIER,
                capital_mode: mode,
            })
            .await?;

        let micro_fraction = Decimal::from(PROBE_MICRO_FRACTION_BPS) / Decimal::from(10_000);
        let notional = (sized.notional_usd * micro_fraction).round_dp(2);
        if notional < Decimal::from(self.config.min_notional_usd) {
            return Ok(ProbeTickResult::blocked(format!(
                "notional_too_small: {} < {}",
                notional, self.config.min_notional_usd
            )));
        }

        let entry_hint = match self.prices.last_price(&choice.symbol).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Price lookup failed before open: {}", e);
                None
            }
        };

        let receipt = match self
            .gateway
            .try_open(&choice.symbol, choice.direction, notional, choice.confidence)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return Ok(ProbeTickResult::blocked(format!("open_failed: {}", e)));
            }
        };
        if !receipt.ok {
            return Ok(ProbeTickResult::blocked(format!(
                "open_failed: {}",
                receipt.reason
            )));
        }

        let entry_price = receipt.fill_price.or(entry_hint).ok_or_else(|| {
            GateError::Internal(format!("no entry price for {} after open", choice.symbol))
        })?;

        // Success: state writes happen here and only here
        let position = ProbePosition {
            symbol: choice.symbol.clone(),
            direction: choice.direction,
            entry_price,
            entry_ts: now,
            confidence: choice.confidence,
            notional_usd: notional,
            trade_id: uuid::Uuid::new_v4(),
        };
        log.record_open(
            position.trade_id,
            &position.symbol,
            position.direction,
            notional,
            entry_price,
            now,
            choice.confidence,
        );
        self.rotation.record_open(rotation_state, &position.symbol, now);
        state.last_trade_at = Some(now);
        state.last_symbol = Some(position.symbol.clone());
        state.open_position = Some(position);

        info!(
            "Probe opened: {} {} notional={} confidence={:.3} (regime {})",
            choice.symbol, choice.direction, notional, choice.confidence, choice.regime
        );
        Ok(ProbeTickResult::opened(
            &choice.symbol,
            format!("opened_{}", choice.direction),
        ))
    }

    /// Close out a position after an exit condition fired
    async fn close_position(
        &self,
        position: &ProbePosition,
        exit: crate::rotation::ExitSignal,
        now: DateTime<Utc>,
        state: &mut ProbeState,
        rotation_state: &mut RotationState,
        log: &mut TradeLog,
    ) -> Result<ProbeTickResult, GateError> {
        let receipt = self
            .gateway
            .try_close(
                &position.trade_id.to_string(),
                exit.exit_price,
                exit.reason.as_str(),
            )
            .await?;
        if !receipt.ok {
            // Keep the position; the next tick retries the exit
            return Err(GateError::ValidationRejected(format!(
                "close_rejected: {}",
                receipt.reason
            )));
        }

        let pnl = log
            .record_close(position.trade_id, exit.exit_price, now, exit.reason.as_str())
            .unwrap_or(Decimal::ZERO);
        if pnl < Decimal::ZERO {
            state.losses_24h.push(now);
        }
        self.rotation
            .arm_post_exit_cooldown(rotation_state, &position.symbol, exit.reason, now);
        state.open_position = None;

        info!(
            "Probe closed: {} reason={} px={} source={} pnl={} ({})",
            position.symbol,
            exit.reason,
            exit.exit_price,
            exit.px_source.as_str(),
            pnl,
            exit.detail
        );
        Ok(ProbeTickResult::closed(
            &position.symbol,
            format!(
                "exit_{}: exit_px_source={}",
                exit.reason,
                exit.px_source.as_str()
            ),
        ))
    }

    /// Eligible symbols in recommended order: policy-allowed, entry-capable
    /// policy level, and over the evidence floors; ranked by
    /// (pf_30d desc, trades_30d desc, symbol asc)
    fn eligible_candidates(&self, snapshot: &EvidenceSnapshot) -> Vec<CandidateSymbol> {
        let cfg = &self.config;
        let mut ranked: Vec<(&String, &crate::evidence::SymbolEvidence)> = snapshot
            .by_symbol
            .iter()
            .filter(|(symbol, ev)| {
                self.policy.allows(symbol)
                    && ev.policy_level.allows_entry()
                    && ev.trades_30d >= cfg.symbol_trades30d_min
                    && ev.pf_30d >= cfg.symbol_pf30d_min
                    && ev.pf_7d >= cfg.symbol_pf7d_min
            })
            .collect();

        ranked.sort_by(|(sym_a, a), (sym_b, b)| {
            b.pf_30d
                .partial_cmp(&a.pf_30d)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.trades_30d.cmp(&a.trades_30d))
                .then_with(|| sym_a.cmp(sym_b))
        });

        ranked
            .into_iter()
            .map(|(symbol, _)| CandidateSymbol {
                symbol: symbol.clone(),
                floor_override: self.policy.floor_override(symbol),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RotationConfig;
    use crate::evidence::{GlobalEvidence, SymbolEvidence};
    use crate::providers::{
        CloseReceipt, OpenReceipt, QuarantineList, SignalProvider, SizeDecision, Signal,
    };
    use crate::shadow::GateDecisionKind;
    use crate::types::{Direction, PolicyLevel};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn t0() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    struct StubSignals(Mutex<HashMap<String, Signal>>);

    impl StubSignals {
        fn with(symbol: &str, direction: Direction, confidence: f64) -> Arc<Self> {
            let mut map = HashMap::new();
            map.insert(
                symbol.to_string(),
                Signal {
                    direction,
                    confidence,
                    entry_ok: !direction.is_flat(),
                    regime: "trend".to_string(),
                    reason: "stub".to_string(),
                },
            );
            Arc::new(Self(Mutex::new(map)))
        }
    }

    #[async_trait]
    impl SignalProvider for StubSignals {
        async fn get_signal(&self, symbol: &str, _tf: &str) -> Result<Signal, GateError> {
            self.0
                .lock()
                .unwrap()
                .get(symbol)
                .cloned()
                .ok_or_else(|| GateError::InputUnavailable(format!("no signal: {}", symbol)))
        }
    }

    struct StubPrices(Option<Decimal>);

    #[async_trait]
    impl PriceFeed for StubPrices {
        async fn last_price(&self, _symbol: &str) -> Result<Option<Decimal>, GateError> {
            Ok(self.0)
        }
    }

    struct NoQuarantine;

    #[async_trait]
    impl QuarantineList for NoQuarantine {
        async fn is_quarantined(&self, _symbol: &str) -> Result<bool, GateError> {
            Ok(false)
        }
    }

    struct StubSizer(Decimal);

    #[async_trait]
    impl PositionSizer for StubSizer {
        async fn size_notional(&self, _req: &SizeRequest) -> Result<SizeDecision, GateError> {
            Ok(SizeDecision {
                notional_usd: self.0,
                reason: "stub".to_string(),
            })
        }
    }

    struct StubGateway {
        open_ok: bool,
        close_ok: bool,
        opened: AtomicBool,
    }

    impl StubGateway {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                open_ok: true,
                close_ok: true,
                opened: AtomicBool::new(false),
            })
        }

        fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                open_ok: false,
                close_ok: true,
                opened: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl OrderGateway for StubGateway {
        async fn try_open(
            &self,
            _symbol: &str,
            _direction: Direction,
            _notional_usd: Decimal,
            _confidence: f64,
        ) -> Result<OpenReceipt, GateError> {
            if self.open_ok {
                self.opened.store(true, Ordering::SeqCst);
                Ok(OpenReceipt {
                    ok: true,
                    reason: "accepted".to_string(),
                    fill_price: Some(Decimal::from(100)),
                })
            } else {
                Ok(OpenReceipt {
                    ok: false,
                    reason: "max_notional_exceeded".to_string(),
                    fill_price: None,
                })
            }
        }

        async fn try_close(
            &self,
            _trade_id: &str,
            _exit_price: Decimal,
            _reason: &str,
        ) -> Result<CloseReceipt, GateError> {
            Ok(CloseReceipt {
                ok: self.close_ok,
                reason: if self.close_ok {
                    "closed".to_string()
                } else {
                    "rejected".to_string()
                },
            })
        }
    }

    fn snapshot(now: DateTime<Utc>) -> EvidenceSnapshot {
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
            generated_at: now - Duration::minutes(5),
            age_seconds: 300,
            global: GlobalEvidence {
                pf_7d: 1.10,
                pf_30d: 1.10,
                trades_30d: 150,
                max_drawdown_pct: 0.05,
            },
            by_symbol,
        }
    }

    fn enabled_gate(now: DateTime<Utc>) -> GateDecision {
        GateDecision {
            enabled: true,
            decision: GateDecisionKind::AutoEnabled,
            reason: "all_enable_conditions_met".to_string(),
            evaluated_at: now,
            last_auto_disable_at: None,
        }
    }

    fn disabled_gate(now: DateTime<Utc>) -> GateDecision {
        GateDecision {
            enabled: false,
            decision: GateDecisionKind::AutoDisabled,
            reason: "evidence_stale_or_absent".to_string(),
            evaluated_at: now,
            last_auto_disable_at: None,
        }
    }

    fn executor(gateway: Arc<StubGateway>, signals: Arc<StubSignals>) -> ProbeExecutor {
        let prices = Arc::new(StubPrices(Some(Decimal::from(100))));
        let rotation = RotationEngine::new(
            RotationConfig::default(),
            signals,
            prices.clone(),
            Arc::new(NoQuarantine),
        );
        ProbeExecutor::new(
            ProbeConfig::default(),
            rotation,
            gateway,
            Arc::new(StubSizer(Decimal::from(5000))),
            prices,
            ExplorationPolicy::unconfigured(true),
        )
    }

    #[tokio::test]
    async fn test_disabled_gate_short_circuits() {
        let now = t0();
        let exec = executor(
            StubGateway::accepting(),
            StubSignals::with("SOL", Direction::Long, 0.70),
        );
        let mut state = ProbeState::new();
        let mut rotation_state = RotationState::new();
        let mut log = TradeLog::new();
        let snap = snapshot(now);

        let result = exec
            .run_tick(
                now,
                &disabled_gate(now),
                CircuitMode::HaltNewEntries,
                Some(&snap),
                &mut state,
                &mut rotation_state,
                &mut log,
            )
            .await;
        assert_eq!(result.action, crate::types::TickAction::Disabled);
        assert!(state.open_position.is_none());
        assert!(log.trades.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_capital_mode_blocks() {
        let now = t0();
        let exec = executor(
            StubGateway::accepting(),
            StubSignals::with("SOL", Direction::Long, 0.70),
        );
        let mut state = ProbeState::new();
        let mut rotation_state = RotationState::new();
        let mut log = TradeLog::new();
        let snap = snapshot(now);

        let result = exec
            .run_tick(
                now,
                &enabled_gate(now),
                CircuitMode::Normal,
                Some(&snap),
                &mut state,
                &mut rotation_state,
                &mut log,
            )
            .await;
        assert_eq!(result.action, crate::types::TickAction::Blocked);
        assert_eq!(result.reason, "capital_mode_not_allowed: normal");
    }

    #[tokio::test]
    async fn test_successful_open_persists_position_and_log() {
        let now = t0();
        let gateway = StubGateway::accepting();
        let exec = executor(gateway.clone(), StubSignals::with("SOL", Direction::Long, 0.70));
        let mut state = ProbeState::new();
        let mut rotation_state = RotationState::new();
        let mut log = TradeLog::new();
        let snap = snapshot(now);

        let result = exec
            .run_tick(
                now,
                &enabled_gate(now),
                CircuitMode::HaltNewEntries,
                Some(&snap),
                &mut state,
                &mut rotation_state,
                &mut log,
            )
            .await;

        assert_eq!(result.action, crate::types::TickAction::Opened);
        assert_eq!(result.symbol.as_deref(), Some("SOL"));
        let pos = state.open_position.as_ref().unwrap();
        assert_eq!(pos.symbol, "SOL");
        // 2% of the sizer's 5000
        assert_eq!(pos.notional_usd, Decimal::from(100));
        assert_eq!(state.last_symbol.as_deref(), Some("SOL"));
        assert_eq!(log.trades.len(), 1);
        assert!(gateway.opened.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_open_failure_mutates_nothing() {
        let now = t0();
        let exec = executor(
            StubGateway::rejecting(),
            StubSignals::with("SOL", Direction::Long, 0.70),
        );
        let mut state = ProbeState::new();
        let mut rotation_state = RotationState::new();
        let mut log = TradeLog::new();
        let snap = snapshot(now);

        let result = exec
            .run_tick(
                now,
                &enabled_gate(now),
                CircuitMode::HaltNewEntries,
                Some(&snap),
                &mut state,
                &mut rotation_state,
                &mut log,
            )
            .await;

        assert_eq!(result.action, crate::types::TickAction::Blocked);
        assert!(result.reason.starts_with("open_failed:"));
        assert!(result.reason.contains("max_notional_exceeded"));
        assert!(state.open_position.is_none());
        assert!(state.last_trade_at.is_none());
        assert!(log.trades.is_empty());
    }

    #[tokio::test]
    async fn test_second_trade_same_day_blocks() {
        let now = t0();
        let exec = executor(
            StubGateway::accepting(),
            StubSignals::with("SOL", Direction::Long, 0.70),
        );
        let mut state = ProbeState::new();
        state.last_trade_at = Some(now - Duration::hours(3));
        let mut rotation_state = RotationState::new();
        let mut log = TradeLog::new();
        let snap = snapshot(now);

        let result = exec
            .run_tick(
                now,
                &enabled_gate(now),
                CircuitMode::HaltNewEntries,
                Some(&snap),
                &mut state,
                &mut rotation_state,
                &mut log,
            )
            .await;
        assert_eq!(result.reason, "already_traded_today_utc");
    }

    #[tokio::test]
    async fn test_open_position_blocks_new_entry() {
        let now = t0();
        let exec = executor(
            StubGateway::accepting(),
            StubSignals::with("SOL", Direction::Long, 0.70),
        );
        let mut state = ProbeState::new();
        state.open_position = Some(ProbePosition {
            symbol: "SOL".to_string(),
            direction: Direction::Long,
            entry_price: Decimal::from(100),
            entry_ts: now - Duration::minutes(5),
            confidence: 0.70,
            notional_usd: Decimal::from(100),
            trade_id: uuid::Uuid::new_v4(),
        });
        let mut rotation_state = RotationState::new();
        let mut log = TradeLog::new();
        let snap = snapshot(now);

        let result = exec
            .run_tick(
                now,
                &enabled_gate(now),
                CircuitMode::HaltNewEntries,
                Some(&snap),
                &mut state,
                &mut rotation_state,
                &mut log,
            )
            .await;
        assert_eq!(result.reason, "open_position_exists");
    }

    #[tokio::test]
    async fn test_timeout_exit_runs_even_with_gate_disabled() {
        let now = t0();
        let exec = executor(
            StubGateway::accepting(),
            StubSignals::with("SOL", Direction::Long, 0.70),
        );
        let mut state = ProbeState::new();
        let trade_id = uuid::Uuid::new_v4();
        let entry_ts = now - Duration::minutes(50);
        state.open_position = Some(ProbePosition {
            symbol: "SOL".to_string(),
            direction: Direction::Long,
            entry_price: Decimal::from(100),
            entry_ts,
            confidence: 0.70,
            notional_usd: Decimal::from(100),
            trade_id,
        });
        let mut rotation_state = RotationState::new();
        let mut log = TradeLog::new();
        log.record_open(
            trade_id,
            "SOL",
            Direction::Long,
            Decimal::from(100),
            Decimal::from(100),
            entry_ts,
            0.70,
        );
        let snap = snapshot(now);

        let result = exec
            .run_tick(
                now,
                &disabled_gate(now),
                CircuitMode::HaltNewEntries,
                Some(&snap),
                &mut state,
                &mut rotation_state,
                &mut log,
            )
            .await;

        assert_eq!(result.action, crate::types::TickAction::Closed);
        assert!(result.reason.contains("exit_timeout"));
        assert!(state.open_position.is_none());
        assert!(log.trades[0].is_closed());
    }

    #[tokio::test]
    async fn test_notional_below_dust_floor_blocks() {
        let now = t0();
        let signals = StubSignals::with("SOL", Direction::Long, 0.70);
        let prices = Arc::new(StubPrices(Some(Decimal::from(100))));
        let rotation = RotationEngine::new(
            RotationConfig::default(),
            signals.clone(),
            prices.clone(),
            Arc::new(NoQuarantine),
        );
        // Sizer allows 400 at full exposure; 2% of that is 8, below the
        // 10 USD floor
        let exec = ProbeExecutor::new(
            ProbeConfig::default(),
            rotation,
            StubGateway::accepting(),
            Arc::new(StubSizer(Decimal::from(400))),
            prices,
            ExplorationPolicy::unconfigured(true),
        );
        let mut state = ProbeState::new();
        let mut rotation_state = RotationState::new();
        let mut log = TradeLog::new();
        let snap = snapshot(now);

        let result = exec
            .run_tick(
                now,
                &enabled_gate(now),
                CircuitMode::HaltNewEntries,
                Some(&snap),
                &mut state,
                &mut rotation_state,
                &mut log,
            )
            .await;
        assert!(result.reason.starts_with("notional_too_small"));
        assert!(state.open_position.is_none());
    }
}
