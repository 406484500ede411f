//! Narrow interfaces to the external collaborators
//!
//! The gate pipeline never talks to an exchange or storage backend directly;
//! it consumes and produces through these traits. Each call carries its own
//! timeout on the implementation side and is never retried here.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceSnapshot;
use crate::types::{CircuitMode, Direction, GateError, PolicyLevel};

/// Directional signal for one symbol/timeframe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub confidence: f64,
    /// Whether the signal model itself considers an entry acceptable
    pub entry_ok: bool,
    /// Market regime label ("trend", "chop", ...)
    pub regime: String,
    pub reason: String,
}

/// Produces direction + confidence for a symbol. Idempotent within a tick.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    async fn get_signal(&self, symbol: &str, timeframe: &str) -> Result<Signal, GateError>;
}

/// Read-only access to the scoring job's evidence snapshots
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Returns `None` when no snapshot has been published yet
    async fn get_snapshot(&self) -> Result<Option<EvidenceSnapshot>, GateError>;
}

/// Admission outcome for an open request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenReceipt {
    pub ok: bool,
    pub reason: String,
    /// Fill price when the order was accepted
    pub fill_price: Option<Decimal>,
}

/// Admission outcome for a close request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseReceipt {
    pub ok: bool,
    pub reason: String,
}

/// Order admission and execution, behind the validation engine
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn try_open(
        &self,
        symbol: &str,
        direction: Direction,
        notional_usd: Decimal,
        confidence: f64,
    ) -> Result<OpenReceipt, GateError>;

    async fn try_close(
        &self,
        trade_id: &str,
        exit_price: Decimal,
        reason: &str,
    ) -> Result<CloseReceipt, GateError>;
}

/// Last-price lookup; `None` when no recent print exists
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn last_price(&self, symbol: &str) -> Result<Option<Decimal>, GateError>;
}

/// Inputs to the external position sizer
#[derive(Debug, Clone, Serialize)]
pub struct SizeRequest {
    pub symbol: String,
    pub equity_usd: Decimal,
    pub confidence: f64,
    pub policy_level: PolicyLevel,
    pub tier: u8,
    pub capital_mode: CircuitMode,
}

/// Sizer output
#[derive(Debug, Clone, Deserialize)]
pub struct SizeDecision {
    pub notional_usd: Decimal,
    pub reason: String,
}

#[async_trait]
pub trait PositionSizer: Send + Sync {
    async fn size_notional(&self, req: &SizeRequest) -> Result<SizeDecision, GateError>;
}

/// Symbol deny-list for new entries (never consulted for exits)
#[async_trait]
pub trait QuarantineList: Send + Sync {
    async fn is_quarantined(&self, symbol: &str) -> Result<bool, GateError>;
}

/// Externally-set global operating posture
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    async fn get_mode(&self) -> Result<CircuitMode, GateError>;
}
