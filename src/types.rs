//! Core types shared across the gate pipeline

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a probe position or signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Flat,
    Short,
}

impl Direction {
    /// Signed representation (-1, 0, +1)
    pub fn sign(&self) -> i8 {
        match self {
            Direction::Long => 1,
            Direction::Flat => 0,
            Direction::Short => -1,
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, Direction::Flat)
    }

    /// Opposite side; Flat stays Flat
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Flat => Direction::Flat,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Flat => write!(f, "flat"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Global circuit-breaker posture, set externally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitMode {
    /// Unrestricted operation
    Normal,
    /// New full-size entries halted; probe lane may still run
    HaltNewEntries,
    /// Risk-off: holds are clamped, no new exposure
    Derisk,
}

impl std::fmt::Display for CircuitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitMode::Normal => write!(f, "normal"),
            CircuitMode::HaltNewEntries => write!(f, "halt_new_entries"),
            CircuitMode::Derisk => write!(f, "derisk"),
        }
    }
}

/// Per-symbol exposure policy from the evidence producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLevel {
    Full,
    Reduced,
    Blocked,
}

impl PolicyLevel {
    /// Whether new probe entries are permitted at this level
    pub fn allows_entry(&self) -> bool {
        matches!(self, PolicyLevel::Full | PolicyLevel::Reduced)
    }
}

impl std::fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyLevel::Full => write!(f, "full"),
            PolicyLevel::Reduced => write!(f, "reduced"),
            PolicyLevel::Blocked => write!(f, "blocked"),
        }
    }
}

/// Outcome of one probe executor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    Opened,
    Blocked,
    Closed,
    Error,
    Disabled,
}

impl std::fmt::Display for TickAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickAction::Opened => write!(f, "opened"),
            TickAction::Blocked => write!(f, "blocked"),
            TickAction::Closed => write!(f, "closed"),
            TickAction::Error => write!(f, "error"),
            TickAction::Disabled => write!(f, "disabled"),
        }
    }
}

/// Result of a probe executor tick, with a greppable reason string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeTickResult {
    pub action: TickAction,
    pub reason: String,
    pub symbol: Option<String>,
}

impl ProbeTickResult {
    pub fn opened(symbol: &str, reason: impl Into<String>) -> Self {
        Self {
            action: TickAction::Opened,
            reason: reason.into(),
            symbol: Some(symbol.to_string()),
        }
    }

    pub fn closed(symbol: &str, reason: impl Into<String>) -> Self {
        Self {
            action: TickAction::Closed,
            reason: reason.into(),
            symbol: Some(symbol.to_string()),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            action: TickAction::Blocked,
            reason: reason.into(),
            symbol: None,
        }
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            action: TickAction::Disabled,
            reason: reason.into(),
            symbol: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            action: TickAction::Error,
            reason: reason.into(),
            symbol: None,
        }
    }
}

/// A live micro position, owned exclusively by the probe executor.
/// At most one exists system-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbePosition {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub entry_ts: DateTime<Utc>,
    pub confidence: f64,
    pub notional_usd: Decimal,
    pub trade_id: Uuid,
}

/// Error taxonomy for the gate pipeline
///
/// Every variant degrades to the most conservative decision for the component
/// that hit it; nothing in the pipeline retries.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Missing or stale input (evidence, price, circuit mode)
    #[error("input unavailable: {0}")]
    InputUnavailable(String),

    /// Order admission or sizing refused the request
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    /// Unexpected failure inside the pipeline or a collaborator transport
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Stable classification string for log grepping
    pub fn classification(&self) -> &'static str {
        match self {
            GateError::InputUnavailable(_) => "input_unavailable",
            GateError::ValidationRejected(_) => "validation_rejected",
            GateError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_sign_and_opposite() {
        assert_eq!(Direction::Long.sign(), 1);
        assert_eq!(Direction::Short.sign(), -1);
        assert_eq!(Direction::Flat.sign(), 0);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Flat.opposite(), Direction::Flat);
    }

    #[test]
    fn test_policy_level_entry_gate() {
        assert!(PolicyLevel::Full.allows_entry());
        assert!(PolicyLevel::Reduced.allows_entry());
        assert!(!PolicyLevel::Blocked.allows_entry());
    }

    #[test]
    fn test_circuit_mode_serde_names() {
        let mode: CircuitMode = serde_json::from_str("\"halt_new_entries\"").unwrap();
        assert_eq!(mode, CircuitMode::HaltNewEntries);
        assert_eq!(
            serde_json::to_string(&CircuitMode::Derisk).unwrap(),
            "\"derisk\""
        );
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            GateError::InputUnavailable("x".into()).classification(),
            "input_unavailable"
        );
        assert_eq!(
            GateError::Internal("x".into()).classification(),
            "internal_error"
        );
    }
}
