//! Persistence backends for liquidation events.
//!
//! Two implementations share one capability set: the InfluxDB-backed durable
//! store and the bounded in-process fallback store. The orchestrator picks one
//! at startup and never re-evaluates the choice.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::StoredEvent;

pub mod influx;
pub mod offline;

#[derive(Debug, Error)]
pub enum AppendError {
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("store transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("fallback file write: {0}")]
    File(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreInitError {
    #[error("store unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("store health check failed: {0}")]
    Unhealthy(String),
}

/// Diagnostic snapshot of a backend. The durable store fills in the schema
/// fields, the fallback store the in-memory counts.
#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub backend: &'static str,
    pub organizations: Vec<String>,
    pub buckets: Vec<String>,
    pub measurements: Vec<String>,
    pub total_events: usize,
    pub symbol_counts: Vec<(String, usize)>,
}

#[async_trait]
pub trait ForceOrderStore: Send {
    /// Durably records one event. At-least-once: a failed append is logged by
    /// the caller and the event is not retried.
    async fn append(&mut self, event: &StoredEvent) -> Result<(), AppendError>;

    /// Most recent events for a symbol within the window, newest first.
    /// Query failures surface as an empty result, never an error.
    async fn query_recent(&self, symbol: &str, limit: usize, window_hours: i64) -> Vec<StoredEvent>;

    async fn summary(&self) -> StoreSummary;

    /// Releases held resources; safe to call once at shutdown.
    async fn close(&mut self);
}
