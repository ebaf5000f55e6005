//! End-to-end checks of the ingestion pipeline: backend selection when the
//! durable store is down, and the decode → stamp → append → query path.

use forcemon::config::{Config, MonitorMode};
use forcemon::event::{decode_frame, IngestClock, Side};
use forcemon::monitor::{select_store, Monitor};
use forcemon::store::offline::OfflineStore;
use forcemon::store::ForceOrderStore;
use tempfile::TempDir;

const SYNTHETIC_FRAME: &str = r#"{"e":"forceOrder","E":1234567890000,"o":{"s":"SOLUSDT","S":"SELL","o":"LIMIT","f":"IOC","q":"1.0","p":"100.0","ap":"100.0","l":"1.0","z":"1.0","X":"FILLED"}}"#;

/// Config pointing at a port nothing listens on, with the fallback file in a
/// throwaway directory.
fn unreachable_config(dir: &TempDir) -> Config {
    let mut cfg = Config::from_env();
    cfg.influx_url = "http://127.0.0.1:9".to_string();
    cfg.monitor_mode = MonitorMode::Symbols;
    cfg.data_file = dir
        .path()
        .join("force_orders_data.json")
        .to_string_lossy()
        .into_owned();
    cfg
}

#[tokio::test]
async fn unreachable_store_selects_fallback() {
    let dir = TempDir::new().unwrap();
    let cfg = unreachable_config(&dir);
    let (_, durable) = select_store(&cfg).await;
    assert!(!durable, "unreachable durable store must select the fallback");

    let monitor = Monitor::new(cfg).await;
    assert!(!monitor.is_durable());
}

#[tokio::test]
async fn fallback_append_reaches_local_file() {
    let dir = TempDir::new().unwrap();
    let cfg = unreachable_config(&dir);
    let (mut store, _) = select_store(&cfg).await;

    let evt = decode_frame(SYNTHETIC_FRAME).unwrap().unwrap();
    let stored = IngestClock::new().stamp(evt);
    store
        .append(&stored)
        .await
        .expect("fallback append must not raise");

    let raw = std::fs::read_to_string(&cfg.data_file).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["force_orders"].as_array().unwrap().len(), 1);
    assert!(doc["symbol_stats"]["SOLUSDT"].is_array());
    assert!(doc["last_updated"].is_string());
}

#[tokio::test]
async fn synthetic_feed_frame_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir
        .path()
        .join("data.json")
        .to_string_lossy()
        .into_owned();
    let mut store = OfflineStore::new(&path);
    let mut clock = IngestClock::new();

    let evt = decode_frame(SYNTHETIC_FRAME).unwrap().unwrap();
    store.append(&clock.stamp(evt)).await.unwrap();

    let results = store.query_recent("SOLUSDT", 1, 24).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].event.price, 100.0);
    assert_eq!(results[0].event.side, Side::Sell);
    assert_eq!(results[0].event.side.as_str(), "SELL");
}

#[tokio::test]
async fn ingest_timestamps_never_decrease_across_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir
        .path()
        .join("data.json")
        .to_string_lossy()
        .into_owned();
    let mut store = OfflineStore::new(&path);
    let mut clock = IngestClock::new();

    for _ in 0..50 {
        let evt = decode_frame(SYNTHETIC_FRAME).unwrap().unwrap();
        store.append(&clock.stamp(evt)).await.unwrap();
    }

    let results = store.query_recent("SOLUSDT", 50, 24).await;
    // Newest first: each entry's ingest timestamp is >= the next one's.
    for pair in results.windows(2) {
        assert!(pair[0].ingest_ts >= pair[1].ingest_ts);
    }
}

#[tokio::test]
async fn fallback_survives_restart() {
    let dir = TempDir::new().unwrap();
    let cfg = unreachable_config(&dir);

    {
        let (mut store, _) = select_store(&cfg).await;
        let evt = decode_frame(SYNTHETIC_FRAME).unwrap().unwrap();
        store.append(&IngestClock::new().stamp(evt)).await.unwrap();
        store.close().await;
    }

    // A fresh selection against the same config reloads the buffer.
    let (store, durable) = select_store(&cfg).await;
    assert!(!durable);
    let results = store.query_recent("SOLUSDT", 10, 24).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].event.symbol, "SOLUSDT");
}
