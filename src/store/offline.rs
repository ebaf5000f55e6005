//! Fallback backend: bounded in-memory retention buffer, serialized to a
//! local JSON file on every append and reloaded at startup.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::event::StoredEvent;
use crate::logging::{error_log, json_log, obj, v_num, v_str, warn_log};

use super::{AppendError, ForceOrderStore, StoreSummary};

/// Whole-history cap; oldest entries are evicted first.
pub const GLOBAL_CAP: usize = 1000;
/// Per-symbol cap, evicted the same way.
pub const SYMBOL_CAP: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RetentionBuffer {
    force_orders: Vec<StoredEvent>,
    symbol_stats: HashMap<String, Vec<StoredEvent>>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

pub struct OfflineStore {
    path: PathBuf,
    buffer: RetentionBuffer,
}

impl OfflineStore {
    /// Loads the buffer from `path` if the file exists and parses; a missing
    /// file starts empty, a corrupt one is logged and replaced on next flush.
    pub fn new(path: &str) -> Self {
        let path = PathBuf::from(path);
        let buffer = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<RetentionBuffer>(&raw) {
                Ok(buffer) => {
                    json_log(
                        "offline_store",
                        obj(&[
                            ("status", v_str("loaded")),
                            ("events", v_num(buffer.force_orders.len() as f64)),
                        ]),
                    );
                    buffer
                }
                Err(e) => {
                    error_log(
                        "offline_store",
                        obj(&[("status", v_str("load_failed")), ("error", v_str(&e.to_string()))]),
                    );
                    RetentionBuffer::default()
                }
            },
            Err(_) => {
                json_log("offline_store", obj(&[("status", v_str("fresh_file"))]));
                RetentionBuffer::default()
            }
        };
        Self { path, buffer }
    }

    /// Rewrites the entire buffer to disk. Overwrite, not append-log.
    fn flush(&mut self) -> Result<(), AppendError> {
        self.buffer.last_updated = Some(Utc::now());
        let json = serde_json::to_string_pretty(&self.buffer)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[async_trait]
impl ForceOrderStore for OfflineStore {
    async fn append(&mut self, event: &StoredEvent) -> Result<(), AppendError> {
        self.buffer.force_orders.push(event.clone());
        while self.buffer.force_orders.len() > GLOBAL_CAP {
            self.buffer.force_orders.remove(0);
        }

        let per_symbol = self
            .buffer
            .symbol_stats
            .entry(event.event.symbol.clone())
            .or_default();
        per_symbol.push(event.clone());
        while per_symbol.len() > SYMBOL_CAP {
            per_symbol.remove(0);
        }

        // Every in-memory append reaches disk before this returns.
        self.flush()?;

        json_log(
            "offline_store",
            obj(&[
                ("status", v_str("saved")),
                ("symbol", v_str(&event.event.symbol)),
                ("total", v_num(self.buffer.force_orders.len() as f64)),
            ]),
        );
        Ok(())
    }

    async fn query_recent(&self, symbol: &str, limit: usize, window_hours: i64) -> Vec<StoredEvent> {
        let Some(entries) = self.buffer.symbol_stats.get(symbol) else {
            warn_log(
                "offline_store",
                obj(&[("status", v_str("unknown_symbol")), ("symbol", v_str(symbol))]),
            );
            return Vec::new();
        };
        let cutoff = Utc::now() - Duration::hours(window_hours);
        let mut recent: Vec<StoredEvent> = entries
            .iter()
            .filter(|e| e.ingest_ts >= cutoff)
            .cloned()
            .collect();
        if recent.len() > limit {
            recent.drain(..recent.len() - limit);
        }
        recent.reverse();
        recent
    }

    async fn summary(&self) -> StoreSummary {
        let mut symbol_counts: Vec<(String, usize)> = self
            .buffer
            .symbol_stats
            .iter()
            .map(|(symbol, entries)| (symbol.clone(), entries.len()))
            .collect();
        symbol_counts.sort();
        StoreSummary {
            backend: "offline",
            total_events: self.buffer.force_orders.len(),
            symbol_counts,
            ..StoreSummary::default()
        }
    }

    async fn close(&mut self) {
        match self.flush() {
            Ok(()) => json_log("offline_store", obj(&[("status", v_str("closed"))])),
            Err(e) => error_log(
                "offline_store",
                obj(&[("status", v_str("final_flush_failed")), ("error", v_str(&e.to_string()))]),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ForceOrderEvent, Side};
    use tempfile::TempDir;

    fn sample_event(symbol: &str, price: f64) -> StoredEvent {
        StoredEvent {
            ingest_ts: Utc::now(),
            event: ForceOrderEvent {
                symbol: symbol.to_string(),
                side: Side::Sell,
                order_type: "LIMIT".to_string(),
                time_in_force: "IOC".to_string(),
                status: "FILLED".to_string(),
                quantity: 1.0,
                price,
                avg_price: price,
                last_qty: 1.0,
                cum_qty: 1.0,
                event_time_ms: 1_234_567_890_000,
            },
        }
    }

    fn store_in(dir: &TempDir) -> (OfflineStore, String) {
        let path = dir
            .path()
            .join("force_orders_data.json")
            .to_string_lossy()
            .into_owned();
        (OfflineStore::new(&path), path)
    }

    #[tokio::test]
    async fn eviction_keeps_most_recent_1000_global() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = store_in(&dir);
        // Spread across symbols so the per-symbol cap does not mask the
        // global one.
        for i in 0..1200u32 {
            let symbol = format!("SYM{}USDT", i % 20);
            let mut evt = sample_event(&symbol, f64::from(i));
            evt.event.event_time_ms = u64::from(i);
            store.append(&evt).await.unwrap();
        }
        assert_eq!(store.buffer.force_orders.len(), GLOBAL_CAP);
        // Oldest 200 evicted: the head of the buffer is event #200.
        assert_eq!(store.buffer.force_orders[0].event.event_time_ms, 200);
        assert_eq!(
            store.buffer.force_orders.last().unwrap().event.event_time_ms,
            1199
        );
        for entries in store.buffer.symbol_stats.values() {
            assert!(entries.len() <= SYMBOL_CAP);
        }
    }

    #[tokio::test]
    async fn per_symbol_cap_is_100() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = store_in(&dir);
        for i in 0..150u32 {
            let mut evt = sample_event("SOLUSDT", f64::from(i));
            evt.event.event_time_ms = u64::from(i);
            store.append(&evt).await.unwrap();
        }
        let entries = store.buffer.symbol_stats.get("SOLUSDT").unwrap();
        assert_eq!(entries.len(), SYMBOL_CAP);
        assert_eq!(entries[0].event.event_time_ms, 50);
    }

    #[tokio::test]
    async fn file_round_trip_reproduces_buffers() {
        let dir = TempDir::new().unwrap();
        let (mut store, path) = store_in(&dir);
        for i in 0..25u32 {
            let symbol = if i % 2 == 0 { "SOLUSDT" } else { "ADAUSDT" };
            store.append(&sample_event(symbol, f64::from(i))).await.unwrap();
        }

        let reloaded = OfflineStore::new(&path);
        assert_eq!(reloaded.buffer.force_orders, store.buffer.force_orders);
        assert_eq!(
            reloaded.buffer.symbol_stats.get("SOLUSDT"),
            store.buffer.symbol_stats.get("SOLUSDT")
        );
        assert_eq!(
            reloaded.buffer.symbol_stats.get("ADAUSDT"),
            store.buffer.symbol_stats.get("ADAUSDT")
        );
    }

    #[tokio::test]
    async fn query_respects_window_and_limit() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = store_in(&dir);
        // One stale entry outside the 24h window.
        let mut stale = sample_event("SOLUSDT", 1.0);
        stale.ingest_ts = Utc::now() - Duration::hours(48);
        store.append(&stale).await.unwrap();
        for i in 0..15u32 {
            store.append(&sample_event("SOLUSDT", f64::from(i))).await.unwrap();
        }

        let cutoff = Utc::now() - Duration::hours(24);
        let results = store.query_recent("SOLUSDT", 10, 24).await;
        assert_eq!(results.len(), 10);
        for evt in &results {
            assert!(evt.ingest_ts >= cutoff);
        }
        // Newest first: the last appended price is 14.
        assert_eq!(results[0].event.price, 14.0);
    }

    #[tokio::test]
    async fn unknown_symbol_returns_empty() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = store_in(&dir);
        store.append(&sample_event("SOLUSDT", 1.0)).await.unwrap();
        assert!(store.query_recent("BTCUSDT", 10, 24).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, "{ not json").unwrap();
        let store = OfflineStore::new(&path.to_string_lossy());
        assert!(store.buffer.force_orders.is_empty());
    }

    #[tokio::test]
    async fn summary_reports_counts() {
        let dir = TempDir::new().unwrap();
        let (mut store, _) = store_in(&dir);
        for _ in 0..3 {
            store.append(&sample_event("SOLUSDT", 1.0)).await.unwrap();
        }
        store.append(&sample_event("ADAUSDT", 1.0)).await.unwrap();
        let summary = store.summary().await;
        assert_eq!(summary.backend, "offline");
        assert_eq!(summary.total_events, 4);
        assert!(summary
            .symbol_counts
            .contains(&("SOLUSDT".to_string(), 3)));
    }
}
