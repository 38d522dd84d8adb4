use std::{path::PathBuf, str::FromStr};

use anyhow::{anyhow, Context, Result};
use chrono::Duration;

use crate::series::{CoalescePolicy, RetentionPolicy, StorePolicy};

// ---------------------------------------------------------------------------
// Policy parsing
// ---------------------------------------------------------------------------

/// Parses `"time:<seconds>"` or `"count:<n>"`.
impl FromStr for RetentionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, amount) = s
            .split_once(':')
            .with_context(|| format!("retention must be 'time:<secs>' or 'count:<n>', got: {s:?}"))?;
        let amount: u32 = amount
            .trim()
            .parse()
            .with_context(|| format!("retention amount must be a positive integer, got: {s:?}"))?;
        if amount == 0 {
            return Err(anyhow!("retention amount must be greater than zero, got: {s:?}"));
        }
        match kind.trim() {
            "time" => Ok(Self::TimeWindow(Duration::seconds(i64::from(amount)))),
            "count" => Ok(Self::MaxCount(amount as usize)),
            other => Err(anyhow!("unknown retention kind: {other:?}")),
        }
    }
}

impl FromStr for CoalescePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "plateau" => Ok(Self::PlateauEqual),
            other => Err(anyhow!("unknown coalesce policy: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub tls: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub store_policy: StorePolicy,
    /// Broadcast batch and bus readings, not only single `GET /log` ones.
    pub broadcast_secondary: bool,
    /// Messages a WebSocket subscriber may lag behind before it is dropped.
    pub ws_buffer: usize,
    /// Capacity of the bus delivery queue.
    pub delivery_queue: usize,
    pub index_html_path: PathBuf,
    /// `None` when `MQTT_HOST` is unset; bus ingestion is then disabled.
    pub mqtt: Option<MqttConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8000")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            store_policy: StorePolicy {
                retention: optional("RETENTION", "time:600")
                    .parse()
                    .context("invalid RETENTION")?,
                coalesce: optional("COALESCE", "none")
                    .parse()
                    .context("invalid COALESCE")?,
            },
            broadcast_secondary: parse_bool(&optional("BROADCAST_SECONDARY", "true"))
                .context("BROADCAST_SECONDARY must be true or false")?,
            ws_buffer: optional("WS_BUFFER", "256")
                .parse()
                .context("WS_BUFFER must be a positive integer")?,
            delivery_queue: optional("DELIVERY_QUEUE", "1024")
                .parse()
                .context("DELIVERY_QUEUE must be a positive integer")?,
            index_html_path: optional("INDEX_HTML_PATH", "frontend/index.html").into(),
            mqtt: mqtt_from_env()?,
        })
    }
}

fn mqtt_from_env() -> Result<Option<MqttConfig>> {
    let Ok(host) = std::env::var("MQTT_HOST") else {
        return Ok(None);
    };
    Ok(Some(MqttConfig {
        host,
        port: optional("MQTT_PORT", "8883")
            .parse()
            .context("MQTT_PORT must be a valid port number")?,
        topic: optional("MQTT_TOPIC", "sensors"),
        client_id: optional("MQTT_CLIENT_ID", "sensor-relay"),
        username: required("MQTT_USERNAME")?,
        password: required("MQTT_PASSWORD")?,
        tls: parse_bool(&optional("MQTT_TLS", "true")).context("MQTT_TLS must be true or false")?,
    }))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(anyhow!("not a boolean: {other:?}")),
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
