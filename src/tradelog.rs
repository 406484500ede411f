//! Durable probe trade log
//!
//! Append-only record of every probe open/close. The probe executor is the
//! only writer; the promotion gate and the inter-open rate limit read it.
//! Being the single source of truth for open timestamps, a process restart
//! cannot bypass the rate limit.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::types::Direction;

/// Days of history retained on prune
const RETENTION_DAYS: i64 = 30;
/// Hard cap on retained records
const MAX_RECORDS: usize = 500;

/// One probe trade, open and (eventually) close
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeTradeRecord {
    pub trade_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub notional_usd: Decimal,
    pub entry_price: Decimal,
    pub entry_ts: DateTime<Utc>,
    pub confidence: f64,
    pub exit_price: Option<Decimal>,
    pub exit_ts: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub pnl_usd: Option<Decimal>,
}

impl ProbeTradeRecord {
    pub fn is_closed(&self) -> bool {
        self.exit_ts.is_some()
    }

    fn is_loss(&self) -> bool {
        self.pnl_usd.map(|p| p < Decimal::ZERO).unwrap_or(false)
    }

    fn is_win(&self) -> bool {
        self.pnl_usd.map(|p| p > Decimal::ZERO).unwrap_or(false)
    }
}

/// Live metrics over the trailing window, computed from closed trades
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveProbeMetrics {
    pub trades: u32,
    /// Gross profit / gross loss. Infinite when there were no losers;
    /// JSON has no inf, so null stands in on the wire.
    #[serde(with = "pf_json")]
    pub pf: f64,
    pub win_rate: f64,
    /// Largest peak-to-trough drop of the cumulative PnL curve,
    /// as percent of the equity base
    pub max_drawdown_pct: f64,
    pub consecutive_losses: u32,
}

impl LiveProbeMetrics {
    pub fn empty() -> Self {
        Self {
            trades: 0,
            pf: 0.0,
            win_rate: 0.0,
            max_drawdown_pct: 0.0,
            consecutive_losses: 0,
        }
    }
}

/// The persisted log document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeLog {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub trades: Vec<ProbeTradeRecord>,
}

impl crate::store::StateDocument for TradeLog {
    const KEY: &'static str = crate::store::PROBE_TRADE_LOG_KEY;
    const SCHEMA_VERSION: u32 = crate::store::TRADE_LOG_SCHEMA_VERSION;
}

impl TradeLog {
    pub fn new() -> Self {
        Self {
            schema_version: crate::store::TRADE_LOG_SCHEMA_VERSION,
            trades: Vec::new(),
        }
    }

    /// Append an open. Records are kept in entry order.
    #[allow(clippy::too_many_arguments)]
    pub fn record_open(
        &mut self,
        trade_id: Uuid,
        symbol: &str,
        direction: Direction,
        notional_usd: Decimal,
        entry_price: Decimal,
        entry_ts: DateTime<Utc>,
        confidence: f64,
    ) {
        self.trades.push(ProbeTradeRecord {
            trade_id,
            symbol: symbol.to_string(),
            direction,
            notional_usd,
            entry_price,
            entry_ts,
            confidence,
            exit_price: None,
            exit_ts: None,
            exit_reason: None,
            pnl_usd: None,
        });
        debug!("Trade log: open {} {}", symbol, trade_id);
    }

    /// Close out an open record. Returns the realized PnL, or `None` when the
    /// trade id is unknown (close of a record the log never saw).
    pub fn record_close(
        &mut self,
        trade_id: Uuid,
        exit_price: Decimal,
        exit_ts: DateTime<Utc>,
        exit_reason: &str,
    ) -> Option<Decimal> {
        let record = self
            .trades
            .iter_mut()
            .find(|t| t.trade_id == trade_id && !t.is_closed())?;

        let entry = record.entry_price;
        let pnl = if entry.is_zero() {
            Decimal::ZERO
        } else {
            let move_frac = (exit_price - entry) / entry;
            move_frac * record.notional_usd * Decimal::from(record.direction.sign())
        };

        record.exit_price = Some(exit_price);
        record.exit_ts = Some(exit_ts);
        record.exit_reason = Some(exit_reason.to_string());
        record.pnl_usd = Some(pnl);
        debug!(
            "Trade log: close {} {} reason={} pnl={}",
            record.symbol, trade_id, exit_reason, pnl
        );
        Some(pnl)
    }

    /// Most recent open timestamp, closed or not
    pub fn last_open_at(&self) -> Option<DateTime<Utc>> {
        self.trades.iter().map(|t| t.entry_ts).max()
    }

    /// Closes for one symbol since `since`
    pub fn closes_since(&self, symbol: &str, since: DateTime<Utc>) -> usize {
        self.trades
            .iter()
            .filter(|t| t.symbol == symbol)
            .filter(|t| t.exit_ts.map(|ts| ts >= since).unwrap_or(false))
            .count()
    }

    /// Timestamps of losing closes since `since`
    pub fn losses_since(&self, since: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut out: Vec<DateTime<Utc>> = self
            .trades
            .iter()
            .filter(|t| t.is_loss())
            .filter_map(|t| t.exit_ts)
            .filter(|ts| *ts >= since)
            .collect();
        out.sort();
        out
    }

    /// Drop records past retention, oldest first
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(RETENTION_DAYS);
        let before = self.trades.len();
        self.trades
            .retain(|t| t.exit_ts.unwrap_or(t.entry_ts) >= cutoff);
        if self.trades.len() > MAX_RECORDS {
            let excess = self.trades.len() - MAX_RECORDS;
            self.trades.drain(..excess);
        }
        if self.trades.len() != before {
            debug!("Trade log pruned: {} -> {}", before, self.trades.len());
        }
    }

    /// Metrics over closed trades in the trailing window
    pub fn live_metrics(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        equity_usd: Decimal,
    ) -> LiveProbeMetrics {
        let since = now - window;
        let mut closed: Vec<&ProbeTradeRecord> = self
            .trades
            .iter()
            .filter(|t| t.is_closed())
            .filter(|t| t.exit_ts.map(|ts| ts >= since).unwrap_or(false))
            .collect();
        closed.sort_by_key(|t| t.exit_ts);

        if closed.is_empty() {
            return LiveProbeMetrics::empty();
        }

        let mut gross_profit = Decimal::ZERO;
        let mut gross_loss = Decimal::ZERO;
        let mut wins = 0u32;
        for t in &closed {
            let pnl = t.pnl_usd.unwrap_or(Decimal::ZERO);
            if pnl > Decimal::ZERO {
                gross_profit += pnl;
                wins += 1;
            } else {
                gross_loss += -pnl;
            }
        }

        let pf = if gross_loss.is_zero() {
            if gross_profit > Decimal::ZERO {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
        };

        // Largest peak-to-trough drop of the cumulative PnL curve
        let mut cumulative = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;
        for t in &closed {
            cumulative += t.pnl_usd.unwrap_or(Decimal::ZERO);
            if cumulative > peak {
                peak = cumulative;
            }
            let dd = peak - cumulative;
            if dd > max_dd {
                max_dd = dd;
            }
        }
        let max_drawdown_pct = if equity_usd.is_zero() {
            0.0
        } else {
            (max_dd / equity_usd).to_f64().unwrap_or(0.0) * 100.0
        };

        // Trailing losers from the most recent trade backward
        let mut consecutive_losses = 0u32;
        for t in closed.iter().rev() {
            if t.is_loss() {
                consecutive_losses += 1;
            } else if t.is_win() {
                break;
            } else {
                // flat close neither extends nor resets the streak
                continue;
            }
        }

        LiveProbeMetrics {
            trades: closed.len() as u32,
            pf,
            win_rate: wins as f64 / closed.len() as f64,
            max_drawdown_pct,
            consecutive_losses,
        }
    }
}

/// Profit factor can be infinite; serialize that as null since JSON
/// has no representation for it.
pub(crate) mod pf_json {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_some(v)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::INFINITY))
    }
}
