//! Durable backend: InfluxDB 2.x over its HTTP API.
//!
//! Writes one line-protocol point per event and reads back with Flux. The
//! handler is hand-rolled on `reqwest`; construction verifies reachability and
//! auto-provisions the bucket, but a healthy construction does not guarantee
//! future writes succeed — revoked credentials surface at write time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::event::{ForceOrderEvent, Side, StoredEvent};
use crate::logging::{error_log, json_log, obj, v_num, v_str, warn_log};

use super::{AppendError, ForceOrderStore, StoreInitError, StoreSummary};

pub struct InfluxStore {
    client: Client,
    base: String,
    auth_header: String,
    org: String,
    bucket: String,
    measurement: String,
}

#[derive(Deserialize)]
struct Health {
    status: String,
}

#[derive(Deserialize, Default)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<BucketInfo>,
}

#[derive(Deserialize)]
struct BucketInfo {
    name: String,
}

#[derive(Deserialize, Default)]
struct OrgList {
    #[serde(default)]
    orgs: Vec<OrgInfo>,
}

#[derive(Deserialize)]
struct OrgInfo {
    id: String,
    name: String,
}

impl InfluxStore {
    pub async fn new(cfg: &Config) -> Result<Self, StoreInitError> {
        // A `user:pass` credential uses the v1-compat session form; the
        // header shape is the same either way, only the diagnostics differ.
        if let Some((username, _)) = cfg.influx_token.split_once(':') {
            json_log(
                "influx",
                obj(&[("auth", v_str("username_password")), ("username", v_str(username))]),
            );
        } else {
            json_log("influx", obj(&[("auth", v_str("token"))]));
        }

        let store = Self {
            client: Client::new(),
            base: cfg.influx_url.trim_end_matches('/').to_string(),
            auth_header: format!("Token {}", cfg.influx_token),
            org: cfg.influx_org.clone(),
            bucket: cfg.influx_bucket.clone(),
            measurement: cfg.measurement.clone(),
        };

        let status = store.health().await?;
        if status != "pass" {
            return Err(StoreInitError::Unhealthy(status));
        }
        json_log(
            "influx",
            obj(&[
                ("status", v_str("connected")),
                ("url", v_str(&store.base)),
                ("org", v_str(&store.org)),
                ("bucket", v_str(&store.bucket)),
            ]),
        );

        store.ensure_bucket().await;
        Ok(store)
    }

    async fn health(&self) -> Result<String, reqwest::Error> {
        let resp = self.client.get(format!("{}/health", self.base)).send().await?;
        let health: Health = resp.json().await?;
        Ok(health.status)
    }

    /// Provisioning is best-effort: a missing bucket we cannot create is
    /// logged and later appends surface their own errors.
    async fn ensure_bucket(&self) {
        match self.bucket_exists().await {
            Ok(true) => {
                json_log("influx", obj(&[("bucket", v_str(&self.bucket)), ("status", v_str("exists"))]));
            }
            Ok(false) => {
                warn_log("influx", obj(&[("bucket", v_str(&self.bucket)), ("status", v_str("missing"))]));
                match self.create_bucket().await {
                    Ok(()) => json_log(
                        "influx",
                        obj(&[("bucket", v_str(&self.bucket)), ("status", v_str("created"))]),
                    ),
                    Err(e) => error_log(
                        "influx",
                        obj(&[
                            ("bucket", v_str(&self.bucket)),
                            ("status", v_str("create_failed")),
                            ("error", v_str(&e.to_string())),
                        ]),
                    ),
                }
            }
            Err(e) => {
                warn_log(
                    "influx",
                    obj(&[("status", v_str("bucket_lookup_failed")), ("error", v_str(&e.to_string()))]),
                );
            }
        }
    }

    async fn bucket_exists(&self) -> Result<bool, reqwest::Error> {
        let url = format!("{}/api/v2/buckets?org={}&name={}", self.base, self.org, self.bucket);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, &self.auth_header)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let list: BucketList = resp.json().await.unwrap_or_default();
        Ok(list.buckets.iter().any(|b| b.name == self.bucket))
    }

    async fn create_bucket(&self) -> anyhow::Result<()> {
        let url = format!("{}/api/v2/orgs?org={}", self.base, self.org);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, &self.auth_header)
            .send()
            .await?;
        let list: OrgList = resp.json().await?;
        let org_id = list
            .orgs
            .iter()
            .find(|o| o.name == self.org)
            .map(|o| o.id.clone())
            .ok_or_else(|| anyhow::anyhow!("org {} not found", self.org))?;

        let body = json!({
            "orgID": org_id,
            "name": self.bucket,
            "retentionRules": [],
        });
        let resp = self
            .client
            .post(format!("{}/api/v2/buckets", self.base))
            .header(AUTHORIZATION, &self.auth_header)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("bucket create rejected: {}", detail);
        }
        Ok(())
    }

    async fn write_point(&self, line: String) -> Result<(), AppendError> {
        let url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ms",
            self.base, self.org, self.bucket
        );
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await?;
        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppendError::Rejected(detail));
        }
        Ok(())
    }

    async fn flux(&self, query: &str) -> Result<String, reqwest::Error> {
        let url = format!("{}/api/v2/query?org={}", self.base, self.org);
        self.client
            .post(&url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(query.to_string())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// Read-back after a write, for diagnostics only. Never blocks or fails
    /// the append that triggered it.
    async fn verify_write(&self, event: &ForceOrderEvent) {
        let query = verify_query(&self.bucket, &self.measurement, event);
        match self.flux(&query).await {
            Ok(csv) => {
                let rows = parse_pivoted_csv(&csv);
                if rows.is_empty() {
                    warn_log(
                        "influx",
                        obj(&[("verify", v_str("not_yet_visible")), ("symbol", v_str(&event.symbol))]),
                    );
                } else {
                    json_log(
                        "influx",
                        obj(&[("verify", v_str("confirmed")), ("symbol", v_str(&event.symbol))]),
                    );
                }
            }
            Err(e) => {
                warn_log(
                    "influx",
                    obj(&[("verify", v_str("query_failed")), ("error", v_str(&e.to_string()))]),
                );
            }
        }
    }
}

#[async_trait]
impl ForceOrderStore for InfluxStore {
    async fn append(&mut self, event: &StoredEvent) -> Result<(), AppendError> {
        let line = line_protocol(&self.measurement, &event.event);
        self.write_point(line).await?;
        json_log(
            "influx",
            obj(&[
                ("status", v_str("saved")),
                ("symbol", v_str(&event.event.symbol)),
                ("side", v_str(event.event.side.as_str())),
                ("qty", v_num(event.event.quantity)),
                ("price", v_num(event.event.price)),
            ]),
        );
        self.verify_write(&event.event).await;
        Ok(())
    }

    async fn query_recent(&self, symbol: &str, limit: usize, window_hours: i64) -> Vec<StoredEvent> {
        let query = recent_query(&self.bucket, &self.measurement, symbol, limit, window_hours);
        match self.flux(&query).await {
            Ok(csv) => parse_pivoted_csv(&csv),
            Err(e) => {
                warn_log(
                    "influx",
                    obj(&[("status", v_str("query_failed")), ("error", v_str(&e.to_string()))]),
                );
                Vec::new()
            }
        }
    }

    async fn summary(&self) -> StoreSummary {
        let organizations = match self
            .client
            .get(format!("{}/api/v2/orgs", self.base))
            .header(AUTHORIZATION, &self.auth_header)
            .send()
            .await
        {
            Ok(resp) => resp
                .json::<OrgList>()
                .await
                .unwrap_or_default()
                .orgs
                .into_iter()
                .map(|o| o.name)
                .collect(),
            Err(_) => Vec::new(),
        };

        let buckets = match self
            .client
            .get(format!("{}/api/v2/buckets?org={}", self.base, self.org))
            .header(AUTHORIZATION, &self.auth_header)
            .send()
            .await
        {
            Ok(resp) => resp
                .json::<BucketList>()
                .await
                .unwrap_or_default()
                .buckets
                .into_iter()
                .map(|b| b.name)
                .collect(),
            Err(_) => Vec::new(),
        };

        let measurements_query = format!(
            "import \"influxdata/influxdb/schema\"\nschema.measurements(bucket: \"{}\")",
            self.bucket
        );
        let measurements = match self.flux(&measurements_query).await {
            Ok(csv) => csv_column(&csv, "_value"),
            Err(_) => Vec::new(),
        };

        StoreSummary {
            backend: "influx",
            organizations,
            buckets,
            measurements,
            ..StoreSummary::default()
        }
    }

    async fn close(&mut self) {
        // The HTTP client holds no server-side session; dropping it is the
        // whole teardown.
        json_log("influx", obj(&[("status", v_str("closed"))]));
    }
}

/// Tag values escape commas, spaces and equals per line protocol.
fn escape_tag(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
        .replace('=', "\\=")
}

pub fn line_protocol(measurement: &str, event: &ForceOrderEvent) -> String {
    format!(
        "{},symbol={},side={},order_type={},time_in_force={},status={} \
         quantity={},price={},avg_price={},last_qty={},cum_qty={} {}",
        escape_tag(measurement),
        escape_tag(&event.symbol),
        escape_tag(event.side.as_str()),
        escape_tag(&event.order_type),
        escape_tag(&event.time_in_force),
        escape_tag(&event.status),
        event.quantity,
        event.price,
        event.avg_price,
        event.last_qty,
        event.cum_qty,
        event.event_time_ms,
    )
}

pub fn recent_query(
    bucket: &str,
    measurement: &str,
    symbol: &str,
    limit: usize,
    window_hours: i64,
) -> String {
    format!(
        "from(bucket: \"{bucket}\")\n\
         |> range(start: -{window_hours}h)\n\
         |> filter(fn: (r) => r[\"_measurement\"] == \"{measurement}\")\n\
         |> filter(fn: (r) => r[\"symbol\"] == \"{symbol}\")\n\
         |> pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")\n\
         |> sort(columns: [\"_time\"], desc: true)\n\
         |> limit(n: {limit})"
    )
}

fn verify_query(bucket: &str, measurement: &str, event: &ForceOrderEvent) -> String {
    format!(
        "from(bucket: \"{bucket}\")\n\
         |> range(start: -1m)\n\
         |> filter(fn: (r) => r[\"_measurement\"] == \"{measurement}\")\n\
         |> filter(fn: (r) => r[\"symbol\"] == \"{symbol}\")\n\
         |> filter(fn: (r) => r[\"side\"] == \"{side}\")\n\
         |> limit(n: 1)",
        symbol = event.symbol,
        side = event.side.as_str(),
    )
}

/// Extracts one column from an annotated-CSV response, skipping annotation
/// rows. Empty lines separate tables and reset the header.
pub fn csv_column(csv: &str, column: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut index: Option<usize> = None;
    for line in csv.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            index = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        match index {
            None => index = cols.iter().position(|c| *c == column),
            Some(i) => {
                if let Some(value) = cols.get(i) {
                    if !value.is_empty() {
                        out.push((*value).to_string());
                    }
                }
            }
        }
    }
    out
}

/// Reconstructs events from a pivoted Flux result. The point timestamp is
/// both the event time and, for query results, the ingest timestamp — the
/// durable store does not persist the original ingest clock.
pub fn parse_pivoted_csv(csv: &str) -> Vec<StoredEvent> {
    let mut out = Vec::new();
    let mut header: Option<Vec<String>> = None;
    for line in csv.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        let Some(ref head) = header else {
            header = Some(cols.into_iter().map(|c| c.to_string()).collect());
            continue;
        };
        let get = |name: &str| -> &str {
            head.iter()
                .position(|c| c == name)
                .and_then(|i| cols.get(i).copied())
                .unwrap_or("")
        };
        let Ok(time) = get("_time").parse::<DateTime<Utc>>() else {
            continue;
        };
        out.push(StoredEvent {
            ingest_ts: time,
            event: ForceOrderEvent {
                symbol: get("symbol").to_string(),
                side: Side::from(get("side").to_string()),
                order_type: get("order_type").to_string(),
                time_in_force: get("time_in_force").to_string(),
                status: get("status").to_string(),
                quantity: get("quantity").parse().unwrap_or(0.0),
                price: get("price").parse().unwrap_or(0.0),
                avg_price: get("avg_price").parse().unwrap_or(0.0),
                last_qty: get("last_qty").parse().unwrap_or(0.0),
                cum_qty: get("cum_qty").parse().unwrap_or(0.0),
                event_time_ms: time.timestamp_millis().max(0) as u64,
            },
        });
    }
    out
}
