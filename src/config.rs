#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// Single aggregate stream carrying liquidations for every symbol.
    AllMarket,
    /// One multiplexed connection over the configured symbol list.
    Symbols,
}

impl MonitorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorMode::AllMarket => "all_market",
            MonitorMode::Symbols => "symbols",
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub ws_base: String,
    pub monitor_mode: MonitorMode,
    pub symbols: Vec<String>,
    pub all_market_stream: String,
    pub influx_url: String,
    pub influx_token: String,
    pub influx_org: String,
    pub influx_bucket: String,
    pub measurement: String,
    pub data_file: String,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_delay_secs: u64,
    pub event_channel_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            ws_base: std::env::var("WS_BASE").unwrap_or_else(|_| "wss://fstream.binance.com/ws".to_string()),
            monitor_mode: match std::env::var("MONITOR_MODE").as_deref() {
                Ok("symbols") | Ok("specific_symbols") => MonitorMode::Symbols,
                _ => MonitorMode::AllMarket,
            },
            symbols: std::env::var("SYMBOLS")
                .unwrap_or_else(|_| "SOLUSDT,ADAUSDT,DOGEUSDT,XRPUSDT,XLMUSDT".to_string())
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            all_market_stream: std::env::var("ALL_MARKET_STREAM").unwrap_or_else(|_| "!forceOrder@arr".to_string()),
            influx_url: std::env::var("INFLUX_URL").unwrap_or_else(|_| "http://localhost:8086".to_string()),
            influx_token: std::env::var("INFLUX_TOKEN").unwrap_or_else(|_| "admin:admin123".to_string()),
            influx_org: std::env::var("INFLUX_ORG").unwrap_or_else(|_| "myorg".to_string()),
            influx_bucket: std::env::var("INFLUX_BUCKET").unwrap_or_else(|_| "binance_force_orders".to_string()),
            measurement: std::env::var("INFLUX_MEASUREMENT").unwrap_or_else(|_| "force_orders".to_string()),
            data_file: std::env::var("DATA_FILE").unwrap_or_else(|_| "./force_orders_data.json".to_string()),
            reconnect_delay_secs: std::env::var("RECONNECT_DELAY_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            max_reconnect_delay_secs: std::env::var("MAX_RECONNECT_DELAY_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(300),
            event_channel_capacity: std::env::var("EVENT_CHANNEL_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(256),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::from_env();
        assert_eq!(cfg.monitor_mode, MonitorMode::AllMarket);
        assert_eq!(cfg.all_market_stream, "!forceOrder@arr");
        assert_eq!(cfg.reconnect_delay_secs, 5);
        assert_eq!(cfg.max_reconnect_delay_secs, 300);
        assert_eq!(cfg.symbols.len(), 5);
        assert!(cfg.symbols.contains(&"SOLUSDT".to_string()));
    }
}
