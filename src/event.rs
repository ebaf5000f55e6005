//! Typed representation of a liquidation ("force order") event and the
//! decode step from the raw stream frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event-type marker carried by liquidation frames on the futures stream.
pub const FORCE_ORDER_MARKER: &str = "forceOrder";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("force order frame missing `{0}`")]
    MissingField(&'static str),
}

/// Order side as reported by the feed. Values outside BUY/SELL pass through
/// untouched so an exchange-side addition never breaks decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Side {
    Buy,
    Sell,
    Other(String),
}

impl Side {
    pub fn as_str(&self) -> &str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
            Side::Other(s) => s,
        }
    }
}

impl From<String> for Side {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            _ => Side::Other(raw),
        }
    }
}

impl From<Side> for String {
    fn from(side: Side) -> Self {
        side.as_str().to_string()
    }
}

/// Immutable once constructed; one per decoded liquidation frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceOrderEvent {
    pub symbol: String,
    pub side: Side,
    pub order_type: String,
    pub time_in_force: String,
    pub status: String,
    pub quantity: f64,
    pub price: f64,
    pub avg_price: f64,
    pub last_qty: f64,
    pub cum_qty: f64,
    /// Exchange event time, epoch milliseconds. Source of truth for ordering
    /// in the durable store.
    pub event_time_ms: u64,
}

/// An event as held by a persistence backend: the decoded event plus the
/// ingest timestamp stamped by the pipeline at receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    #[serde(rename = "timestamp")]
    pub ingest_ts: DateTime<Utc>,
    #[serde(rename = "data")]
    pub event: ForceOrderEvent,
}

/// Stamps ingest timestamps that never move backwards within one process run,
/// even if the wall clock does. Backends never re-derive this value.
#[derive(Debug, Default)]
pub struct IngestClock {
    last: Option<DateTime<Utc>>,
}

impl IngestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&mut self, event: ForceOrderEvent) -> StoredEvent {
        let now = Utc::now();
        let ts = match self.last {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last = Some(ts);
        StoredEvent { ingest_ts: ts, event }
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "e")]
    event_type: Option<String>,
    #[serde(rename = "E")]
    event_time: Option<u64>,
    #[serde(rename = "o")]
    order: Option<RawOrder>,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "f")]
    time_in_force: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "ap")]
    avg_price: Option<String>,
    #[serde(rename = "l")]
    last_qty: Option<String>,
    #[serde(rename = "z")]
    cum_qty: Option<String>,
    #[serde(rename = "X")]
    status: String,
}

fn parse_qty(raw: &str) -> f64 {
    raw.parse().unwrap_or(0.0)
}

fn parse_opt_qty(raw: &Option<String>) -> f64 {
    raw.as_deref().map(parse_qty).unwrap_or(0.0)
}

/// Decodes one inbound text frame. `Ok(None)` means the frame parsed but is
/// not a liquidation event and must be ignored; `Err` means the frame is
/// malformed and must be skipped without dropping the connection.
pub fn decode_frame(text: &str) -> Result<Option<ForceOrderEvent>, DecodeError> {
    let frame: RawFrame = serde_json::from_str(text)?;
    if frame.event_type.as_deref() != Some(FORCE_ORDER_MARKER) {
        return Ok(None);
    }
    let event_time_ms = frame.event_time.ok_or(DecodeError::MissingField("E"))?;
    let order = frame.order.ok_or(DecodeError::MissingField("o"))?;
    Ok(Some(ForceOrderEvent {
        symbol: order.symbol,
        side: Side::from(order.side),
        order_type: order.order_type,
        time_in_force: order.time_in_force,
        status: order.status,
        quantity: parse_qty(&order.quantity),
        price: parse_qty(&order.price),
        avg_price: parse_opt_qty(&order.avg_price),
        last_qty: parse_opt_qty(&order.last_qty),
        cum_qty: parse_opt_qty(&order.cum_qty),
        event_time_ms,
    }))
}
