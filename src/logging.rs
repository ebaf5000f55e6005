//! Structured logging: one JSON object per line on stdout.
//!
//! Every entry carries a timestamp, a monotonic sequence number, a level and
//! the emitting module, so a log stream can be filtered and replayed in order
//! even when lines from reconnect cycles interleave.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn log(level: Level, module: &str, mut fields: Map<String, Value>) {
    if level < Level::from_env() {
        return;
    }
    let seq = LOG_SEQ.fetch_add(1, Ordering::SeqCst);
    fields.insert("ts".to_string(), Value::String(ts_now()));
    fields.insert("seq".to_string(), Value::Number(seq.into()));
    fields.insert("level".to_string(), Value::String(level.as_str().to_string()));
    fields.insert("module".to_string(), Value::String(module.to_string()));
    println!("{}", Value::Object(fields));
}

pub fn debug_log(module: &str, fields: Map<String, Value>) {
    log(Level::Debug, module, fields);
}

pub fn json_log(module: &str, fields: Map<String, Value>) {
    log(Level::Info, module, fields);
}

pub fn warn_log(module: &str, fields: Map<String, Value>) {
    log(Level::Warn, module, fields);
}

pub fn error_log(module: &str, fields: Map<String, Value>) {
    log(Level::Error, module, fields);
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn obj_builds_map() {
        let map = obj(&[("a", v_str("x")), ("b", v_num(1.5))]);
        assert_eq!(map.get("a").unwrap(), "x");
        assert_eq!(map.get("b").unwrap().as_f64().unwrap(), 1.5);
    }

    #[test]
    fn non_finite_numbers_become_null() {
        assert_eq!(v_num(f64::NAN), Value::Null);
        assert_eq!(v_num(f64::INFINITY), Value::Null);
    }
}
