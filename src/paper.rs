//! Paper-mode collaborators
//!
//! In-process stand-ins for the execution-side services so the pipeline
//! runs end-to-end with no live exchange: a fill simulator with bounded
//! random slippage, a reference sizer, and fixed quarantine/circuit
//! implementations for offline runs.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::providers::{
    CircuitBreaker, CloseReceipt, OpenReceipt, OrderGateway, PositionSizer, PriceFeed,
    QuarantineList, SizeDecision, SizeRequest,
};
use crate::types::{CircuitMode, Direction, GateError, PolicyLevel};

/// Simulated order gateway: fills at the upstream price plus bounded
/// adverse slippage
pub struct PaperGateway {
    prices: Arc<dyn PriceFeed>,
    max_slippage_bps: u32,
}

impl PaperGateway {
    pub fn new(prices: Arc<dyn PriceFeed>) -> Self {
        Self {
            prices,
            max_slippage_bps: 5,
        }
    }

    pub fn with_max_slippage_bps(mut self, bps: u32) -> Self {
        self.max_slippage_bps = bps;
        self
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn try_open(
        &self,
        symbol: &str,
        direction: Direction,
        notional_usd: Decimal,
        confidence: f64,
    ) -> Result<OpenReceipt, GateError> {
        let price = match self.prices.last_price(symbol).await? {
            Some(p) => p,
            None => {
                return Ok(OpenReceipt {
                    ok: false,
                    reason: format!("no_price_for_fill: {}", symbol),
                    fill_price: None,
                });
            }
        };

        // Adverse slippage: buys fill above the print, sells below
        let bps = rand::thread_rng().gen_range(0..=self.max_slippage_bps);
        let adverse = Decimal::from(bps) * Decimal::from(direction.sign()) / Decimal::from(10_000);
        let fill = price * (Decimal::ONE + adverse);

        info!(
            "Paper fill: open {} {} notional={} confidence={:.3} px={}",
            symbol, direction, notional_usd, confidence, fill
        );
        Ok(OpenReceipt {
            ok: true,
            reason: "paper_fill".to_string(),
            fill_price: Some(fill),
        })
    }

    async fn try_close(
        &self,
        trade_id: &str,
        exit_price: Decimal,
        reason: &str,
    ) -> Result<CloseReceipt, GateError> {
        info!(
            "Paper fill: close {} px={} reason={}",
            trade_id, exit_price, reason
        );
        Ok(CloseReceipt {
            ok: true,
            reason: "paper_fill".to_string(),
        })
    }
}

/// Reference sizer: a fixed fraction of equity, halved at the reduced
/// policy level
pub struct PaperSizer {
    equity_fraction_bps: u32,
}

impl PaperSizer {
    pub fn new() -> Self {
        Self {
            equity_fraction_bps: 5_000,
        }
    }

    pub fn with_equity_fraction_bps(mut self, bps: u32) -> Self {
        self.equity_fraction_bps = bps;
        self
    }
}

impl Default for PaperSizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PositionSizer for PaperSizer {
    async fn size_notional(&self, req: &SizeRequest) -> Result<SizeDecision, GateError> {
        if req.policy_level == PolicyLevel::Blocked {
            return Err(GateError::ValidationRejected(format!(
                "policy_level_blocked: {}",
                req.symbol
            )));
        }

        let mut notional =
            req.equity_usd * Decimal::from(self.equity_fraction_bps) / Decimal::from(10_000);
        let mut reason = format!("equity_fraction_{}bps", self.equity_fraction_bps);
        if req.policy_level == PolicyLevel::Reduced {
            notional /= Decimal::from(2);
            reason.push_str("_reduced_half");
        }

        Ok(SizeDecision {
            notional_usd: notional.round_dp(2),
            reason,
        })
    }
}

/// Fixed quarantine set for offline runs
pub struct StaticQuarantine(HashSet<String>);

impl StaticQuarantine {
    pub fn none() -> Self {
        Self(HashSet::new())
    }

    pub fn of(symbols: &[&str]) -> Self {
        Self(symbols.iter().map(|s| s.to_string()).collect())
    }
}

#[async_trait]
impl QuarantineList for StaticQuarantine {
    async fn is_quarantined(&self, symbol: &str) -> Result<bool, GateError> {
        Ok(self.0.contains(symbol))
    }
}

/// Fixed circuit-breaker posture for offline runs
pub struct StaticCircuit(pub CircuitMode);

#[async_trait]
impl CircuitBreaker for StaticCircuit {
    async fn get_mode(&self) -> Result<CircuitMode, GateError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    struct OnePrice(Option<Decimal>);

    #[async_trait]
    impl PriceFeed for OnePrice {
        async fn last_price(&self, _symbol: &str) -> Result<Option<Decimal>, GateError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_paper_open_fills_with_adverse_slippage() {
        let gateway = PaperGateway::new(Arc::new(OnePrice(Some(Decimal::from(100)))))
            .with_max_slippage_bps(10);

        let receipt = gateway
            .try_open("SOL", Direction::Long, Decimal::from(100), 0.7)
            .await
            .unwrap();
        assert!(receipt.ok);
        let fill = receipt.fill_price.unwrap();
        // Long fills at or above the print, never below
        assert!(fill >= Decimal::from(100));
        assert!(fill <= Decimal::from_str("100.1").unwrap());
    }

    #[tokio::test]
    async fn test_paper_open_without_price_refuses() {
        let gateway = PaperGateway::new(Arc::new(OnePrice(None)));
        let receipt = gateway
            .try_open("SOL", Direction::Long, Decimal::from(100), 0.7)
            .await
            .unwrap();
        assert!(!receipt.ok);
        assert!(receipt.reason.contains("no_price_for_fill"));
    }

    #[tokio::test]
    async fn test_paper_sizer_policy_levels() {
        let sizer = PaperSizer::new();
        let mut req = SizeRequest {
            symbol: "SOL".to_string(),
            equity_usd: Decimal::from(10_000),
            confidence: 0.7,
            policy_level: PolicyLevel::Full,
            tier: 1,
            capital_mode: CircuitMode::HaltNewEntries,
        };

        let full = sizer.size_notional(&req).await.unwrap();
        assert_eq!(full.notional_usd, Decimal::from(5_000));

        req.policy_level = PolicyLevel::Reduced;
        let reduced = sizer.size_notional(&req).await.unwrap();
        assert_eq!(reduced.notional_usd, Decimal::from(2_500));

        req.policy_level = PolicyLevel::Blocked;
        assert!(sizer.size_notional(&req).await.is_err());
    }
}
