//! Progressive exposure gate pipeline
//!
//! Decides, tick by tick, how much real trading risk an automated strategy
//! may take per symbol, from continuously re-evaluated performance evidence.
//! Four cooperating components: the shadow gate (may the probe lane run at
//! all), the probe executor (one bounded micro position under strict
//! frequency constraints), the rotation/cooldown engine (exits, cooldowns,
//! fair symbol selection), and the promotion gate (three-state machine
//! granting or revoking full exposure).

pub mod client;
pub mod config;
pub mod cooldown;
pub mod evidence;
pub mod paper;
pub mod policy;
pub mod probe;
pub mod promotion;
pub mod providers;
pub mod rotation;
pub mod runner;
pub mod shadow;
pub mod store;
pub mod tradelog;
pub mod types;

// Re-export main types for convenience
pub use client::GateServiceClient;
pub use config::GateConfig;
pub use cooldown::{CooldownKind, CooldownRegistry};
pub use evidence::{EvidenceSnapshot, GlobalEvidence, SymbolEvidence};
pub use policy::ExplorationPolicy;
pub use probe::{ProbeExecutor, ProbeState};
pub use promotion::{PromotionGate, PromotionMode, PromotionState};
pub use providers::{
    CircuitBreaker, EvidenceSource, OrderGateway, PositionSizer, PriceFeed, QuarantineList,
    Signal, SignalProvider,
};
pub use rotation::{ExitReason, RotationEngine, RotationState};
pub use runner::{Collaborators, GateRunner, TickReport};
pub use shadow::{GateDecision, GateDecisionKind, ShadowGate, ShadowGateState};
pub use store::StateStore;
pub use tradelog::{LiveProbeMetrics, ProbeTradeRecord, TradeLog};
pub use types::{CircuitMode, Direction, GateError, PolicyLevel, ProbePosition, ProbeTickResult, TickAction};
