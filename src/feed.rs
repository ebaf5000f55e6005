//! Websocket client for the futures liquidation stream.
//!
//! Keeps one logical subscription alive indefinitely: decode failures skip the
//! frame, transport failures re-enter the connect path after an exponentially
//! growing delay, and only an external shutdown request ends the loop.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite};
use url::Url;

use crate::config::{Config, MonitorMode};
use crate::event::{self, ForceOrderEvent};
use crate::logging::{debug_log, error_log, json_log, obj, v_num, v_str, warn_log};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket transport: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("stream closed by remote")]
    Closed,
    #[error("bad stream url: {0}")]
    BadUrl(#[from] url::ParseError),
}

/// Exponential backoff between reconnect attempts. The delay doubles after
/// every wait and saturates at `max`. It is never reset after a successful
/// connection (see DESIGN.md).
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial_secs: u64, max_secs: u64) -> Self {
        Self {
            delay: Duration::from_secs(initial_secs),
            max: Duration::from_secs(max_secs),
        }
    }

    /// Returns the wait to apply now and advances the doubled state.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = (self.delay * 2).min(self.max);
        current
    }
}

/// Builds the subscription target: one aggregate stream name, or the
/// per-symbol stream names joined into a single multiplexed path.
pub fn stream_url(cfg: &Config) -> Result<Url, FeedError> {
    let url = match cfg.monitor_mode {
        MonitorMode::AllMarket => format!("{}/{}", cfg.ws_base, cfg.all_market_stream),
        MonitorMode::Symbols => {
            let streams: Vec<String> = cfg
                .symbols
                .iter()
                .map(|s| format!("{}@forceorder", s.to_lowercase()))
                .collect();
            format!("{}/{}", cfg.ws_base, streams.join("/"))
        }
    };
    Ok(Url::parse(&url)?)
}

pub struct FeedClient {
    cfg: Config,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
}

impl FeedClient {
    pub fn new(cfg: Config, shutdown: watch::Receiver<bool>) -> Self {
        let backoff = Backoff::new(cfg.reconnect_delay_secs, cfg.max_reconnect_delay_secs);
        Self { cfg, backoff, shutdown }
    }

    /// Connect/receive/reconnect loop. Returns only after a shutdown request;
    /// no feed-side condition terminates it.
    pub async fn run(mut self, tx: mpsc::Sender<ForceOrderEvent>) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.connect_and_receive(&tx).await {
                Ok(()) => break,
                Err(e) => {
                    warn_log("feed", obj(&[("status", v_str("disconnected")), ("error", v_str(&e.to_string()))]));
                }
            }
            if *self.shutdown.borrow() {
                break;
            }
            let wait = self.backoff.next_delay();
            json_log(
                "feed",
                obj(&[("status", v_str("reconnect_wait")), ("delay_secs", v_num(wait.as_secs_f64()))]),
            );
            tokio::select! {
                _ = sleep(wait) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        json_log("feed", obj(&[("status", v_str("stopped"))]));
    }

    /// One connection lifetime. `Ok` means shutdown was requested while
    /// connected; any `Err` re-enters the backoff path in `run`.
    async fn connect_and_receive(
        &mut self,
        tx: &mpsc::Sender<ForceOrderEvent>,
    ) -> Result<(), FeedError> {
        let url = stream_url(&self.cfg)?;
        json_log(
            "feed",
            obj(&[
                ("status", v_str("connecting")),
                ("mode", v_str(self.cfg.monitor_mode.as_str())),
                ("url", v_str(url.as_str())),
            ]),
        );
        let (ws, _) = connect_async(url.as_str()).await?;
        json_log(
            "feed",
            obj(&[
                ("status", v_str("connected")),
                ("mode", v_str(self.cfg.monitor_mode.as_str())),
                ("symbols", v_num(self.cfg.symbols.len() as f64)),
            ]),
        );
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        let _ = write.send(tungstenite::Message::Close(None)).await;
                        json_log("feed", obj(&[("status", v_str("closed_by_request"))]));
                        return Ok(());
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        handle_frame(&text, tx).await;
                    }
                    Some(Ok(tungstenite::Message::Ping(payload))) => {
                        let _ = write.send(tungstenite::Message::Pong(payload)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        return Err(FeedError::Closed);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

/// Decode one text frame and forward liquidation events to the handler
/// channel. Frames of other event types are ignored; malformed frames are
/// logged and skipped without touching the connection.
async fn handle_frame(text: &str, tx: &mpsc::Sender<ForceOrderEvent>) {
    match event::decode_frame(text) {
        Ok(Some(evt)) => {
            json_log(
                "feed",
                obj(&[
                    ("event", v_str("force_order")),
                    ("symbol", v_str(&evt.symbol)),
                    ("side", v_str(evt.side.as_str())),
                    ("qty", v_num(evt.quantity)),
                    ("price", v_num(evt.price)),
                ]),
            );
            if tx.send(evt).await.is_err() {
                warn_log("feed", obj(&[("status", v_str("handler_channel_closed"))]));
            }
        }
        Ok(None) => {
            debug_log("feed", obj(&[("event", v_str("ignored_frame"))]));
        }
        Err(e) => {
            error_log(
                "feed",
                obj(&[("event", v_str("decode_failed")), ("error", v_str(&e.to_string()))]),
            );
        }
    }
}
