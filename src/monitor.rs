//! Top-level coordinator: picks a persistence backend once at startup, wires
//! the feed client to it through a bounded channel, and owns the shutdown
//! sequence.

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::event::IngestClock;
use crate::feed::FeedClient;
use crate::logging::{error_log, json_log, obj, v_num, v_str, warn_log};
use crate::store::influx::InfluxStore;
use crate::store::offline::OfflineStore;
use crate::store::ForceOrderStore;

/// Tries the durable backend; any construction failure selects the fallback
/// instead. Decided once — the choice is never re-evaluated while running,
/// even if the durable store becomes reachable later.
pub async fn select_store(cfg: &Config) -> (Box<dyn ForceOrderStore>, bool) {
    match InfluxStore::new(cfg).await {
        Ok(store) => {
            json_log("monitor", obj(&[("backend", v_str("influx"))]));
            (Box::new(store), true)
        }
        Err(e) => {
            warn_log(
                "monitor",
                obj(&[
                    ("backend", v_str("offline")),
                    ("reason", v_str(&e.to_string())),
                ]),
            );
            (Box::new(OfflineStore::new(&cfg.data_file)), false)
        }
    }
}

pub struct Monitor {
    cfg: Config,
    store: Box<dyn ForceOrderStore>,
    durable: bool,
}

impl Monitor {
    pub async fn new(cfg: Config) -> Self {
        let (store, durable) = select_store(&cfg).await;
        if durable {
            let info = store.summary().await;
            json_log(
                "monitor",
                obj(&[
                    ("orgs", v_str(&info.organizations.join(","))),
                    ("buckets", v_str(&info.buckets.join(","))),
                    ("measurements", v_str(&info.measurements.join(","))),
                ]),
            );
        }
        Self { cfg, store, durable }
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Runs until SIGINT or SIGTERM. All event work happens in the consumer
    /// side of the channel; the feed task only decodes and forwards.
    pub async fn run(mut self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, mut event_rx) = mpsc::channel(self.cfg.event_channel_capacity);

        let feed = FeedClient::new(self.cfg.clone(), shutdown_rx);
        let feed_task = tokio::spawn(feed.run(event_tx));

        let mut clock = IngestClock::new();

        json_log(
            "monitor",
            obj(&[
                ("status", v_str("running")),
                ("mode", v_str(self.cfg.monitor_mode.as_str())),
            ]),
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    json_log("monitor", obj(&[("signal", v_str("SIGINT"))]));
                    break;
                }
                _ = sigterm.recv() => {
                    json_log("monitor", obj(&[("signal", v_str("SIGTERM"))]));
                    break;
                }
                received = event_rx.recv() => match received {
                    Some(evt) => {
                        let stored = clock.stamp(evt);
                        if let Err(e) = self.store.append(&stored).await {
                            // At-least-once only: a failed append is logged
                            // and the event is dropped, not retried.
                            error_log(
                                "monitor",
                                obj(&[
                                    ("status", v_str("append_failed")),
                                    ("symbol", v_str(&stored.event.symbol)),
                                    ("error", v_str(&e.to_string())),
                                ]),
                            );
                        }
                    }
                    None => {
                        warn_log("monitor", obj(&[("status", v_str("feed_channel_closed"))]));
                        break;
                    }
                },
            }
        }

        // Cleanup is best-effort: failures are logged inside close(), never
        // retried.
        json_log("monitor", obj(&[("status", v_str("cleanup"))]));
        let _ = shutdown_tx.send(true);
        let _ = feed_task.await;

        let mut drained = 0u64;
        while let Ok(evt) = event_rx.try_recv() {
            let stored = clock.stamp(evt);
            if self.store.append(&stored).await.is_ok() {
                drained += 1;
            }
        }
        if drained > 0 {
            json_log("monitor", obj(&[("drained", v_num(drained as f64))]));
        }

        self.store.close().await;
        json_log("monitor", obj(&[("status", v_str("stopped"))]));
        Ok(())
    }
}
