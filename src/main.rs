use anyhow::Result;
use forcemon::config::Config;
use forcemon::logging::{json_log, obj, v_str};
use forcemon::monitor::Monitor;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    json_log(
        "main",
        obj(&[
            ("status", v_str("starting")),
            ("mode", v_str(cfg.monitor_mode.as_str())),
        ]),
    );
    let monitor = Monitor::new(cfg).await;
    monitor.run().await
}
