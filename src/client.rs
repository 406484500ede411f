//! HTTP collaborator client
//!
//! One client for the services the pipeline consumes: evidence snapshots
//! from the scoring job, signals, prices, order admission, sizing, the
//! quarantine list and the circuit breaker. Calls carry the client-level
//! timeout; the pipeline never retries them.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::evidence::EvidenceSnapshot;
use crate::providers::{
    CircuitBreaker, CloseReceipt, EvidenceSource, OpenReceipt, OrderGateway, PositionSizer,
    PriceFeed, QuarantineList, SignalProvider, SizeDecision, SizeRequest, Signal,
};
use crate::types::{CircuitMode, Direction, GateError};

/// Default timeout for any single collaborator call
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client for the gate pipeline's collaborator services
pub struct GateServiceClient {
    client: Client,
    base_url: String,
}

impl GateServiceClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn transport_err(e: reqwest::Error) -> GateError {
        if e.is_timeout() {
            GateError::InputUnavailable(format!("request timed out: {}", e))
        } else {
            GateError::Internal(format!("transport: {}", e))
        }
    }

    async fn error_text(response: reqwest::Response) -> String {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        format!("{} - {}", status, text)
    }
}

#[async_trait]
impl EvidenceSource for GateServiceClient {
    async fn get_snapshot(&self) -> Result<Option<EvidenceSnapshot>, GateError> {
        let url = format!("{}/v1/evidence/snapshot", self.base_url);
        debug!("Fetching evidence snapshot from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_err)?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let snapshot: EvidenceSnapshot = response
                    .json()
                    .await
                    .map_err(|e| GateError::Internal(format!("decoding snapshot: {}", e)))?;
                Ok(Some(snapshot))
            }
            reqwest::StatusCode::NO_CONTENT | reqwest::StatusCode::NOT_FOUND => Ok(None),
            _ => Err(GateError::InputUnavailable(format!(
                "snapshot fetch failed: {}",
                Self::error_text(response).await
            ))),
        }
    }
}

#[async_trait]
impl SignalProvider for GateServiceClient {
    async fn get_signal(&self, symbol: &str, timeframe: &str) -> Result<Signal, GateError> {
        let url = format!(
            "{}/v1/signal/{}?timeframe={}",
            self.base_url, symbol, timeframe
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_err)?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| GateError::Internal(format!("decoding signal: {}", e)))
        } else {
            Err(GateError::InputUnavailable(format!(
                "signal fetch failed for {}: {}",
                symbol,
                Self::error_text(response).await
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

#[async_trait]
impl PriceFeed for GateServiceClient {
    async fn last_price(&self, symbol: &str) -> Result<Option<Decimal>, GateError> {
        let url = format!("{}/v1/prices/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_err)?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let data: PriceResponse = response
                    .json()
                    .await
                    .map_err(|e| GateError::Internal(format!("decoding price: {}", e)))?;
                let price = data
                    .price
                    .parse::<Decimal>()
                    .map_err(|e| GateError::Internal(format!("parsing price: {}", e)))?;
                Ok(Some(price))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            _ => Err(GateError::InputUnavailable(format!(
                "price fetch failed for {}: {}",
                symbol,
                Self::error_text(response).await
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenRequest<'a> {
    symbol: &'a str,
    direction: Direction,
    notional_usd: Decimal,
    confidence: f64,
}

#[derive(Debug, Serialize)]
struct CloseRequest<'a> {
    trade_id: &'a str,
    exit_price: Decimal,
    reason: &'a str,
}

#[async_trait]
impl OrderGateway for GateServiceClient {
    async fn try_open(
        &self,
        symbol: &str,
        direction: Direction,
        notional_usd: Decimal,
        confidence: f64,
    ) -> Result<OpenReceipt, GateError> {
        let url = format!("{}/v1/orders/open", self.base_url);
        let req = OpenRequest {
            symbol,
            direction,
            notional_usd,
            confidence,
        };

        let response = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(Self::transport_err)?;

        match response.status() {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| GateError::Internal(format!("decoding open receipt: {}", e))),
            reqwest::StatusCode::UNPROCESSABLE_ENTITY | reqwest::StatusCode::CONFLICT => {
                // Admission refused the order; surface its reason verbatim
                Err(GateError::ValidationRejected(Self::error_text(response).await))
            }
            _ => Err(GateError::Internal(format!(
                "open request failed: {}",
                Self::error_text(response).await
            ))),
        }
    }

    async fn try_close(
        &self,
        trade_id: &str,
        exit_price: Decimal,
        reason: &str,
    ) -> Result<CloseReceipt, GateError> {
        let url = format!("{}/v1/orders/close", self.base_url);
        let req = CloseRequest {
            trade_id,
            exit_price,
            reason,
        };

        let response = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(Self::transport_err)?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| GateError::Internal(format!("decoding close receipt: {}", e)))
        } else {
            Err(GateError::Internal(format!(
                "close request failed: {}",
                Self::error_text(response).await
            )))
        }
    }
}

#[async_trait]
impl PositionSizer for GateServiceClient {
    async fn size_notional(&self, req: &SizeRequest) -> Result<SizeDecision, GateError> {
        let url = format!("{}/v1/sizing", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(Self::transport_err)?;

        match response.status() {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| GateError::Internal(format!("decoding size decision: {}", e))),
            reqwest::StatusCode::UNPROCESSABLE_ENTITY => Err(GateError::ValidationRejected(
                Self::error_text(response).await,
            )),
            _ => Err(GateError::InputUnavailable(format!(
                "sizing request failed: {}",
                Self::error_text(response).await
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuarantineResponse {
    quarantined: bool,
}

#[async_trait]
impl QuarantineList for GateServiceClient {
    async fn is_quarantined(&self, symbol: &str) -> Result<bool, GateError> {
        let url = format!("{}/v1/quarantine/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_err)?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let data: QuarantineResponse = response
                    .json()
                    .await
                    .map_err(|e| GateError::Internal(format!("decoding quarantine: {}", e)))?;
                Ok(data.quarantined)
            }
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            _ => Err(GateError::InputUnavailable(format!(
                "quarantine lookup failed for {}: {}",
                symbol,
                Self::error_text(response).await
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CapitalModeResponse {
    mode: CircuitMode,
}

#[async_trait]
impl CircuitBreaker for GateServiceClient {
    async fn get_mode(&self) -> Result<CircuitMode, GateError> {
        let url = format!("{}/v1/capital/mode", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_err)?;

        if response.status().is_success() {
            let data: CapitalModeResponse = response
                .json()
                .await
                .map_err(|e| GateError::Internal(format!("decoding capital mode: {}", e)))?;
            Ok(data.mode)
        } else {
            Err(GateError::InputUnavailable(format!(
                "capital mode fetch failed: {}",
                Self::error_text(response).await
            )))
        }
    }
}
