//! Gate pipeline runner - per-tick orchestration
//!
//! One tick runs to completion before the next begins: all state reads at
//! the start, the shadow gate first (cheapest, most restrictive), exits
//! before entries inside the probe lane, the promotion gate independently at
//! the end. Writes are the final step of whichever branch completed; a
//! blocked or failed branch leaves its document untouched.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::GateConfig;
use crate::evidence::EvidenceSnapshot;
use crate::policy::ExplorationPolicy;
use crate::probe::{ProbeExecutor, ProbeState};
use crate::promotion::{
    PromotionGate, PromotionInputs, PromotionMode, PromotionState, ShadowMetrics, SubjectEvidence,
};
use crate::providers::{
    CircuitBreaker, EvidenceSource, OrderGateway, PositionSizer, PriceFeed, QuarantineList,
    SignalProvider,
};
use crate::rotation::{RotationEngine, RotationState};
use crate::shadow::{GateDecision, ShadowGate, ShadowGateState};
use crate::store::StateStore;
use crate::tradelog::TradeLog;
use crate::types::{CircuitMode, ProbeTickResult, TickAction};

/// Everything the pipeline talks to
pub struct Collaborators {
    pub signals: Arc<dyn SignalProvider>,
    pub evidence: Arc<dyn EvidenceSource>,
    pub gateway: Arc<dyn OrderGateway>,
    pub prices: Arc<dyn PriceFeed>,
    pub sizer: Arc<dyn PositionSizer>,
    pub quarantine: Arc<dyn QuarantineList>,
    pub circuit: Arc<dyn CircuitBreaker>,
}

/// Aggregated outcome of one tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub evaluated_at: DateTime<Utc>,
    pub mode: Option<CircuitMode>,
    pub gate: GateDecision,
    pub probe: ProbeTickResult,
    pub promotion: PromotionState,
}

/// The single-threaded cooperative control loop
pub struct GateRunner {
    config: GateConfig,
    store: StateStore,
    shadow: ShadowGate,
    probe: ProbeExecutor,
    promotion: PromotionGate,
    evidence: Arc<dyn EvidenceSource>,
    circuit: Arc<dyn CircuitBreaker>,
}

impl GateRunner {
    pub fn new(
        config: GateConfig,
        store: StateStore,
        collab: Collaborators,
        policy: ExplorationPolicy,
    ) -> Self {
        let shadow = ShadowGate::new(config.shadow.clone(), collab.quarantine.clone());
        let rotation = RotationEngine::new(
            config.rotation.clone(),
            collab.signals.clone(),
            collab.prices.clone(),
            collab.quarantine.clone(),
        );
        let probe = ProbeExecutor::new(
            config.probe.clone(),
            rotation,
            collab.gateway,
            collab.sizer,
            collab.prices,
            policy,
        );
        let promotion = PromotionGate::new(config.promotion.clone());

        Self {
            config,
            store,
            shadow,
            probe,
            promotion,
            evidence: collab.evidence,
            circuit: collab.circuit,
        }
    }

    /// Run one tick at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        // All state reads happen up front
        let mut shadow_state = self
            .store
            .load::<ShadowGateState>()
            .await
            .context("loading shadow gate state")?
            .unwrap_or_else(ShadowGateState::new);
        let mut probe_state = self
            .store
            .load::<ProbeState>()
            .await
            .context("loading probe executor state")?
            .unwrap_or_else(ProbeState::new);
        let mut rotation_state = self
            .store
            .load::<RotationState>()
            .await
            .context("loading rotation engine state")?
            .unwrap_or_else(RotationState::new);
        let mut log = self
            .store
            .load::<TradeLog>()
            .await
            .context("loading probe trade log")?
            .unwrap_or_else(TradeLog::new);
        let prev_promotion_mode = self
            .store
            .load::<PromotionState>()
            .await
            .context("loading promotion gate state")?
            .map(|p| p.mode)
            .unwrap_or(PromotionMode::Disabled);

        let mode = match self.circuit.get_mode().await {
            Ok(m) => Some(m),
            Err(e) => {
                error!("Circuit breaker unavailable ({}): {}", e.classification(), e);
                None
            }
        };
        let snapshot = match self.evidence.get_snapshot().await {
            Ok(s) => s,
            Err(e) => {
                error!("Evidence source unavailable ({}): {}", e.classification(), e);
                None
            }
        };

        probe_state.prune_losses(now);
        let probe_losses_24h = probe_state.losses_in_24h(now);

        // Shadow gate first; its document is rewritten every tick
        let gate = self
            .shadow
            .evaluate(now, mode, snapshot.as_ref(), probe_losses_24h, &mut shadow_state)
            .await;
        self.store
            .save(&shadow_state)
            .await
            .context("persisting shadow gate state")?;

        // Probe lane: exit evaluation happens inside, before any entry gate.
        // With the circuit mode unknown, exits run under the de-risk clamp.
        let probe_mode = mode.unwrap_or(CircuitMode::Derisk);
        let probe_result = self
            .probe
            .run_tick(
                now,
                &gate,
                probe_mode,
                snapshot.as_ref(),
                &mut probe_state,
                &mut rotation_state,
                &mut log,
            )
            .await;

        // Probe document and trade log persist only on mutating outcomes;
        // a blocked or error tick leaves them byte-identical. Rotation
        // bookkeeping (cooldowns, the opens ring) is the rotation engine's
        // own work product and persists whenever it changed.
        match probe_result.action {
            TickAction::Opened | TickAction::Closed => {
                log.prune(now);
                self.store.save(&log).await.context("persisting trade log")?;
                self.store
                    .save(&probe_state)
                    .await
                    .context("persisting probe state")?;
            }
            TickAction::Blocked | TickAction::Disabled | TickAction::Error => {}
        }
        if rotation_state.take_dirty() {
            self.store
                .save(&rotation_state)
                .await
                .context("persisting rotation state")?;
        }

        // Promotion gate, against the previously persisted mode
        let promotion = self.evaluate_promotion(
            now,
            &gate,
            &shadow_state,
            &probe_state,
            &log,
            snapshot.as_ref(),
            prev_promotion_mode,
        );
        self.store
            .save(&promotion)
            .await
            .context("persisting promotion state")?;

        let report = TickReport {
            evaluated_at: now,
            mode,
            gate,
            probe: probe_result,
            promotion,
        };
        info!(
            "Tick complete: gate={} probe={}({}) promotion={}({})",
            report.gate.decision,
            report.probe.action,
            report.probe.reason,
            report.promotion.mode,
            report.promotion.reason
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_promotion(
        &self,
        now: DateTime<Utc>,
        gate: &GateDecision,
        shadow_state: &ShadowGateState,
        probe_state: &ProbeState,
        log: &TradeLog,
        snapshot: Option<&EvidenceSnapshot>,
        prev_mode: PromotionMode,
    ) -> PromotionState {
        let max_age = Duration::minutes(self.config.shadow.evidence_max_age_minutes);
        let snapshot = match snapshot {
            Some(s) if s.is_fresh(now, max_age) => s,
            _ => return PromotionState::evaluation_error(now, "evidence_unavailable"),
        };

        let live = log.live_metrics(
            now,
            Duration::days(self.config.promotion.live_window_days),
            Decimal::from(self.config.probe.equity_usd),
        );
        let shadow_metrics = ShadowMetrics {
            pf_7d: snapshot.global.pf_7d,
            pf_30d: snapshot.global.pf_30d,
            trades: snapshot.global.trades_30d,
        };

        // The active probe subject: the open position, else the symbol the
        // lane traded last. A subject the evidence no longer covers fails
        // the per-symbol floors rather than skipping them.
        let subject = probe_state
            .open_position
            .as_ref()
            .map(|p| p.symbol.clone())
            .or_else(|| probe_state.last_symbol.clone())
            .map(|symbol| match snapshot.symbol(&symbol) {
                Some(ev) => SubjectEvidence {
                    symbol,
                    trades_30d: ev.trades_30d,
                    pf_30d: ev.pf_30d,
                },
                None => SubjectEvidence {
                    symbol,
                    trades_30d: 0,
                    pf_30d: 0.0,
                },
            });

        let inputs = PromotionInputs {
            live,
            shadow: shadow_metrics,
            gate_enabled: gate.enabled,
            gate_last_enabled_at: shadow_state.last_enabled_at,
            subject,
        };
        self.promotion.evaluate(now, prev_mode, &inputs)
    }

    /// Run the cooperative loop until the process is stopped
    pub async fn run(self, tick_interval: std::time::Duration) -> Result<()> {
        self.store.init().await?;
        info!(
            "Gate runner starting: tick every {:?}, state dir {}",
            tick_interval,
            self.store.dir().display()
        );

        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            let now = Utc::now();
            if let Err(e) = self.tick(now).await {
                error!("Tick failed: {:#}", e);
            }
        }
    }
}
